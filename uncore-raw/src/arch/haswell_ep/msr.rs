//! MSR-resident uncore boxes for Haswell-EP

use crate::box_type::{Backend, BoxType};

/// Uncore global per-socket control
pub const PMON_GLOBAL_CTL: u64 = 0x700;
pub const PMON_GLOBAL_STATUS: u64 = 0x701;
pub const PMON_GLOBAL_CONFIG: u64 = 0x702;

/// U-box (system configuration controller)
pub mod ubox {
    pub const UCLK_FIXED_CTL: u64 = 0x703;
    pub const UCLK_FIXED_CTR: u64 = 0x704;
    pub const EVNTSEL0: u64 = 0x705;
    pub const BOX_STATUS: u64 = 0x708;
    pub const CTR0: u64 = 0x709;
}

/// PCU (power control unit)
pub mod pcu {
    pub const BOX_CTL: u64 = 0x710;
    pub const EVNTSEL0: u64 = 0x711;
    pub const BOX_FILTER: u64 = 0x715;
    pub const BOX_STATUS: u64 = 0x716;
    pub const CTR0: u64 = 0x717;
}

/// SBO (ring stop) boxes
pub mod sbox {
    pub const BOX_CTL: u64 = 0x720;
    pub const EVNTSEL0: u64 = 0x721;
    pub const BOX_FILTER: u64 = 0x725;
    pub const CTR0: u64 = 0x726;
    pub const STRIDE: u64 = 0xA;
}

/// C-boxes (one per LLC slice)
pub mod cbox {
    pub const BOX_CTL: u64 = 0xE00;
    pub const EVNTSEL0: u64 = 0xE01;
    pub const BOX_FILTER0: u64 = 0xE05;
    pub const BOX_FILTER1: u64 = 0xE06;
    pub const BOX_STATUS: u64 = 0xE07;
    pub const CTR0: u64 = 0xE08;
    pub const STRIDE: u64 = 0x10;
}

// The U-box has no box-level control register; freeze/reset go through
// the global control instead.
pub const UBOX: BoxType = BoxType {
    num_counters: 2,
    num_boxes: 1,
    perf_ctr_bits: 48,
    perf_ctl: ubox::EVNTSEL0,
    perf_ctr: ubox::CTR0,
    fixed_ctl: Some(ubox::UCLK_FIXED_CTL),
    fixed_ctr: Some(ubox::UCLK_FIXED_CTR),
    fixed_ctr_bits: 48,
    box_status: Some(ubox::BOX_STATUS),
    ..BoxType::new("U-BOX", Backend::Local)
};

pub const PCUBOX: BoxType = BoxType {
    num_counters: 4,
    num_boxes: 1,
    perf_ctr_bits: 48,
    perf_ctl: pcu::EVNTSEL0,
    perf_ctr: pcu::CTR0,
    box_ctl: Some(pcu::BOX_CTL),
    box_status: Some(pcu::BOX_STATUS),
    threshold_bits: 5,
    ..BoxType::new("PCU-BOX", Backend::Local)
};

pub const SBOX: BoxType = BoxType {
    num_counters: 4,
    num_boxes: 4,
    perf_ctr_bits: 48,
    perf_ctl: sbox::EVNTSEL0,
    perf_ctr: sbox::CTR0,
    box_ctl: Some(sbox::BOX_CTL),
    box_stride: sbox::STRIDE,
    ..BoxType::new("S-BOX", Backend::Local)
};

pub const CBOX: BoxType = BoxType {
    num_counters: 4,
    num_boxes: 18,
    perf_ctr_bits: 48,
    perf_ctl: cbox::EVNTSEL0,
    perf_ctr: cbox::CTR0,
    box_ctl: Some(cbox::BOX_CTL),
    box_status: Some(cbox::BOX_STATUS),
    box_stride: cbox::STRIDE,
    ..BoxType::new("C-BOX", Backend::Local)
};

pub const MSR_BOXES: &[BoxType] = &[UBOX, PCUBOX, SBOX, CBOX];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msr_boxes_are_local() {
        assert!(MSR_BOXES.iter().all(|t| t.backend == Backend::Local));
    }

    #[test]
    fn test_cbox_last_instance_addresses() {
        assert_eq!(CBOX.box_ctl_addr(17), Some(0xF10));
        assert_eq!(CBOX.counter_addr(17, 0), Some(0xF18));
    }

    #[test]
    fn test_ubox_has_fixed_counter_but_no_box_ctl() {
        assert_eq!(UBOX.box_ctl, None);
        assert_eq!(UBOX.fixed_ctr_addr(0), Some(0x704));
        assert_eq!(UBOX.fixed_ctl_addr(0), Some(0x703));
    }

    #[test]
    fn test_pcu_threshold_is_narrow() {
        assert_eq!(PCUBOX.threshold_bits, 5);
        assert_eq!(CBOX.threshold_bits, 8);
    }
}
