pub mod affinity;
pub mod arch;
pub mod cpuid;
pub mod msr;
pub mod pci;
pub mod sim;

pub use affinity::AffinityGuard;
pub use arch::{CpuSignature, CPU_SIGNATURE};
pub use msr::MsrHandle;
pub use pci::{PciBus, PciDevice};
pub use sim::{SimBus, SimDevice, SimMsr};
