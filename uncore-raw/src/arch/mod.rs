//! Platform-specific box-type tables
//!
//! Each module exposes the same three tables: `MSR_BOXES` (local backend),
//! `PCI_BOXES` (windowed backend) and `PCI_DEVICE_IDS`, the device match
//! table binding discovered PCI functions to entries of `PCI_BOXES`.
//!
//! ## Supported Platforms
//!
//! - **Haswell-EP/EX** (`haswell-ep` feature) - Xeon E5 v3 and E7 v3

#[cfg(feature = "haswell-ep")]
pub mod haswell_ep;
