//! PCI-resident uncore boxes for Haswell-EP
//!
//! Every box here is one PCI function; register addresses are offsets into
//! that function's configuration space.

use crate::box_type::{Backend, BoxType, DeviceMatch};

pub const INTEL_VENDOR_ID: u16 = 0x8086;

/// Register offsets shared by all Haswell-EP PCI boxes
pub const PMON_BOX_CTL: u64 = 0xF4;
pub const PMON_CTL0: u64 = 0xD8;
pub const PMON_CTR0: u64 = 0xA0;

/// IMC fixed DCLK counter
pub const IMC_DCLK_CTL: u64 = 0xF0;
pub const IMC_DCLK_CTR: u64 = 0xD0;

const fn pci_box(name: &'static str, num_boxes: u32, num_counters: u32, bits: u32) -> BoxType {
    BoxType {
        num_counters,
        num_boxes,
        perf_ctr_bits: bits,
        perf_ctl: PMON_CTL0,
        perf_ctr: PMON_CTR0,
        box_ctl: Some(PMON_BOX_CTL),
        ..BoxType::new(name, Backend::Windowed)
    }
}

pub const HA: BoxType = pci_box("HA", 2, 4, 48);

pub const IMC: BoxType = BoxType {
    fixed_ctl: Some(IMC_DCLK_CTL),
    fixed_ctr: Some(IMC_DCLK_CTR),
    fixed_ctr_bits: 48,
    ..pci_box("IMC", 8, 4, 48)
};

pub const QPI: BoxType = pci_box("QPI", 3, 4, 48);
pub const R2PCIE: BoxType = pci_box("R2PCIe", 1, 4, 44);
pub const R3QPI: BoxType = pci_box("R3QPI", 3, 3, 44);

pub const HA_TYPE: usize = 0;
pub const IMC_TYPE: usize = 1;
pub const QPI_TYPE: usize = 2;
pub const R2PCIE_TYPE: usize = 3;
pub const R3QPI_TYPE: usize = 4;

pub const PCI_BOXES: &[BoxType] = &[HA, IMC, QPI, R2PCIE, R3QPI];

const fn id(device: u16, type_index: usize, ordinal_hint: u32) -> DeviceMatch {
    DeviceMatch::new(INTEL_VENDOR_ID, device, type_index, ordinal_hint)
}

pub const PCI_DEVICE_IDS: &[DeviceMatch] = &[
    id(0x2F30, HA_TYPE, 0),
    id(0x2F38, HA_TYPE, 1),
    id(0x2FB0, IMC_TYPE, 0),
    id(0x2FB1, IMC_TYPE, 1),
    id(0x2FB4, IMC_TYPE, 2),
    id(0x2FB5, IMC_TYPE, 3),
    id(0x2FD0, IMC_TYPE, 4),
    id(0x2FD1, IMC_TYPE, 5),
    id(0x2FD4, IMC_TYPE, 6),
    id(0x2FD5, IMC_TYPE, 7),
    id(0x2F32, QPI_TYPE, 0),
    id(0x2F33, QPI_TYPE, 1),
    id(0x2F3A, QPI_TYPE, 2),
    id(0x2F34, R2PCIE_TYPE, 0),
    id(0x2F36, R3QPI_TYPE, 0),
    id(0x2F37, R3QPI_TYPE, 1),
    id(0x2F3E, R3QPI_TYPE, 2),
];
