// Platform selection: fixes which box-type tables are active.

use std::fmt;
use std::str::FromStr;

use uncore_raw::arch::haswell_ep;
use uncore_raw::{Backend, BoxType, DeviceMatch};

use crate::common::arch::{CpuSignature, CPU_SIGNATURE};
use crate::error::UncoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformId {
    HaswellEp,
    /// Any other CPU; carries the display model for diagnostics
    Unknown(u32),
}

impl PlatformId {
    pub fn name(&self) -> &'static str {
        match self {
            PlatformId::HaswellEp => "Haswell-EP",
            PlatformId::Unknown(_) => "Unknown",
        }
    }

    pub fn from_signature(signature: &CpuSignature) -> Self {
        if !signature.intel || signature.family != 0x6 {
            return PlatformId::Unknown(signature.model);
        }

        match signature.model {
            haswell_ep::CPU_MODEL => PlatformId::HaswellEp,
            model => PlatformId::Unknown(model),
        }
    }

    /// Platform of the running CPU
    pub fn detect() -> Self {
        let id = Self::from_signature(&CPU_SIGNATURE);
        match id {
            PlatformId::Unknown(model) => {
                tracing::warn!("No uncore tables for CPU model {:X}", model)
            }
            _ => tracing::info!("Detected uncore platform: {}", id),
        }
        id
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformId::Unknown(model) => write!(f, "Unknown (model {model:X})"),
            known => f.write_str(known.name()),
        }
    }
}

impl FromStr for PlatformId {
    type Err = UncoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "haswell-ep" | "haswell-ex" | "hsx" | "hswep" => Ok(PlatformId::HaswellEp),
            "none" | "unknown" => Ok(PlatformId::Unknown(0)),
            other => Err(UncoreError::ParseError(format!(
                "unknown platform '{other}' (expected haswell-ep or none)"
            ))),
        }
    }
}

/// The active box-type tables for one platform
///
/// Produced once by [`select_platform`] and passed explicitly to enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformProfile {
    id: PlatformId,
    msr_boxes: &'static [BoxType],
    pci_boxes: &'static [BoxType],
    pci_ids: &'static [DeviceMatch],
}

impl PlatformProfile {
    pub const fn new(
        id: PlatformId,
        msr_boxes: &'static [BoxType],
        pci_boxes: &'static [BoxType],
        pci_ids: &'static [DeviceMatch],
    ) -> Self {
        Self {
            id,
            msr_boxes,
            pci_boxes,
            pci_ids,
        }
    }

    /// Profile with no box types; every later operation is a no-op
    pub const fn inert(id: PlatformId) -> Self {
        Self::new(id, &[], &[], &[])
    }

    pub fn id(&self) -> PlatformId {
        self.id
    }

    pub fn box_types(&self, backend: Backend) -> &'static [BoxType] {
        match backend {
            Backend::Local => self.msr_boxes,
            Backend::Windowed => self.pci_boxes,
        }
    }

    pub fn device_matches(&self) -> &'static [DeviceMatch] {
        self.pci_ids
    }

    pub fn is_inert(&self) -> bool {
        self.msr_boxes.is_empty() && self.pci_boxes.is_empty()
    }
}

pub fn select_platform(id: PlatformId) -> PlatformProfile {
    match id {
        PlatformId::HaswellEp => PlatformProfile::new(
            id,
            haswell_ep::MSR_BOXES,
            haswell_ep::PCI_BOXES,
            haswell_ep::PCI_DEVICE_IDS,
        ),
        PlatformId::Unknown(_) => {
            tracing::warn!("Platform {} has no uncore tables, all boxes inert", id);
            PlatformProfile::inert(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_mapping() {
        let hsx = CpuSignature::from_eax(0x0003_06F2, true);
        assert_eq!(PlatformId::from_signature(&hsx), PlatformId::HaswellEp);

        let amd = CpuSignature::from_eax(0x0003_06F2, false);
        assert_eq!(PlatformId::from_signature(&amd), PlatformId::Unknown(0x3F));

        let skx = CpuSignature::from_eax(0x0005_0654, true);
        assert_eq!(PlatformId::from_signature(&skx), PlatformId::Unknown(0x55));
    }

    #[test]
    fn test_parse_platform() {
        assert_eq!("Haswell-EP".parse::<PlatformId>().unwrap(), PlatformId::HaswellEp);
        assert_eq!("none".parse::<PlatformId>().unwrap(), PlatformId::Unknown(0));
        assert!("zen4".parse::<PlatformId>().is_err());
    }

    #[test]
    fn test_select_haswell_tables() {
        let profile = select_platform(PlatformId::HaswellEp);
        assert_eq!(profile.box_types(Backend::Local).len(), 4);
        assert_eq!(profile.box_types(Backend::Windowed).len(), 5);
        assert!(!profile.device_matches().is_empty());
        assert!(!profile.is_inert());
    }

    #[test]
    fn test_unknown_platform_is_inert() {
        let profile = select_platform(PlatformId::Unknown(0x55));
        assert!(profile.is_inert());
        assert!(profile.device_matches().is_empty());
        assert_eq!(profile.id().to_string(), "Unknown (model 55)");
    }
}
