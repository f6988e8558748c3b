//! Intel Haswell-EP/EX uncore definitions
//!
//! Xeon E5 v3 and E7 v3. The uncore is split across two transports:
//!
//! - **MSR boxes**: U-box, PCU, SBO (ring stops) and C-boxes (LLC slices)
//! - **PCI boxes**: Home Agents, memory controller channels, QPI ports,
//!   R2PCIe and R3QPI ring interfaces
//!
//! ## References
//!
//! - Intel® Xeon® Processor E5 and E7 v3 Family Uncore Performance Monitoring
//!   Reference Manual

pub mod msr;
pub mod pci;

pub use msr::MSR_BOXES;
pub use pci::{PCI_BOXES, PCI_DEVICE_IDS};

/// CPUID display model of Haswell-EP and Haswell-EX
pub const CPU_MODEL: u32 = 0x3F;
