// CPU signature detection

use once_cell::sync::Lazy;

use crate::common::cpuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSignature {
    pub intel: bool,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
}

impl CpuSignature {
    /// Decode the display family/model/stepping from CPUID leaf 1 EAX
    pub fn from_eax(eax: u32, intel: bool) -> Self {
        let stepping = eax & 0xF;
        let model = (eax >> 4) & 0xF;
        let family = (eax >> 8) & 0xF;
        let extended_model = (eax >> 16) & 0xF;
        let extended_family = (eax >> 20) & 0xFF;

        let display_family = if family == 0xF {
            family + extended_family
        } else {
            family
        };

        let display_model = if family == 0x6 || family == 0xF {
            (extended_model << 4) + model
        } else {
            model
        };

        Self {
            intel,
            family: display_family,
            model: display_model,
            stepping,
        }
    }

    fn detect() -> Self {
        let (eax, _ebx, _ecx, _edx) = cpuid::cpuid(1, 0);
        let signature = Self::from_eax(eax, cpuid::vendor() == "GenuineIntel");

        tracing::info!(
            "CPU: Family {:X}, Model {:X}, Stepping {:X}",
            signature.family,
            signature.model,
            signature.stepping
        );

        signature
    }
}

pub static CPU_SIGNATURE: Lazy<CpuSignature> = Lazy::new(CpuSignature::detect);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haswell_ep_signature() {
        // Xeon E5-2699 v3
        let sig = CpuSignature::from_eax(0x0003_06F2, true);
        assert_eq!(sig.family, 0x6);
        assert_eq!(sig.model, 0x3F);
        assert_eq!(sig.stepping, 0x2);
    }

    #[test]
    fn test_skylake_sp_signature() {
        let sig = CpuSignature::from_eax(0x0005_0654, true);
        assert_eq!(sig.model, 0x55);
        assert_eq!(sig.stepping, 0x4);
    }
}
