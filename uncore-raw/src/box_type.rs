//! Box-type descriptors
//!
//! A [`BoxType`] describes one class of uncore unit (C-box, PCU, IMC channel,
//! ...) and how its registers are addressed. Every descriptor is bound to
//! exactly one [`Backend`]; the address fields are interpreted in that
//! backend's address space.

/// Register-access transport a box type is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Globally addressed model-specific registers
    Local,
    /// Offsets into the configuration space of a discovered PCI device
    Windowed,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Local => "MSR",
            Backend::Windowed => "PCI",
        }
    }

    /// Address distance between consecutive counter registers
    pub const fn counter_step(&self) -> u64 {
        match self {
            Backend::Local => 1,
            Backend::Windowed => 8,
        }
    }

    /// Address distance between consecutive event-control registers
    pub const fn control_step(&self) -> u64 {
        match self {
            Backend::Local => 1,
            Backend::Windowed => 4,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of a class of uncore boxes
///
/// `None` marks a register the class does not implement. Operations that need
/// such a register are no-ops for boxes of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxType {
    pub name: &'static str,
    pub backend: Backend,
    /// Width of the programmable counters in bits
    pub perf_ctr_bits: u32,
    pub num_counters: u32,
    /// Number of instances the platform declares
    pub num_boxes: u32,
    /// Event select register of counter 0
    pub perf_ctl: u64,
    /// Counter register of counter 0
    pub perf_ctr: u64,
    pub fixed_ctl: Option<u64>,
    pub fixed_ctr: Option<u64>,
    pub fixed_ctr_bits: u32,
    /// Legal event-select bits; zero places no restriction
    pub event_mask: u64,
    /// Implemented width of the event-select threshold field
    pub threshold_bits: u32,
    pub box_ctl: Option<u64>,
    pub box_status: Option<u64>,
    /// Address stride between instances (local backend only)
    pub box_stride: u64,
}

impl BoxType {
    /// Descriptor with every optional register absent
    pub const fn new(name: &'static str, backend: Backend) -> Self {
        Self {
            name,
            backend,
            perf_ctr_bits: 48,
            num_counters: 0,
            num_boxes: 0,
            perf_ctl: 0,
            perf_ctr: 0,
            fixed_ctl: None,
            fixed_ctr: None,
            fixed_ctr_bits: 0,
            event_mask: 0,
            threshold_bits: 8,
            box_ctl: None,
            box_status: None,
            box_stride: 0,
        }
    }

    fn instance_base(&self, ordinal: u32) -> u64 {
        match self.backend {
            Backend::Local => ordinal as u64 * self.box_stride,
            Backend::Windowed => 0,
        }
    }

    /// Box-level control register of instance `ordinal`
    pub fn box_ctl_addr(&self, ordinal: u32) -> Option<u64> {
        self.box_ctl.map(|ctl| ctl + self.instance_base(ordinal))
    }

    pub fn box_status_addr(&self, ordinal: u32) -> Option<u64> {
        self.box_status
            .map(|status| status + self.instance_base(ordinal))
    }

    /// Event select register of counter `counter` on instance `ordinal`
    pub fn event_ctl_addr(&self, ordinal: u32, counter: u32) -> Option<u64> {
        if counter >= self.num_counters {
            return None;
        }
        Some(
            self.perf_ctl
                + self.instance_base(ordinal)
                + counter as u64 * self.backend.control_step(),
        )
    }

    /// Counter register of counter `counter` on instance `ordinal`
    pub fn counter_addr(&self, ordinal: u32, counter: u32) -> Option<u64> {
        if counter >= self.num_counters {
            return None;
        }
        Some(
            self.perf_ctr
                + self.instance_base(ordinal)
                + counter as u64 * self.backend.counter_step(),
        )
    }

    pub fn fixed_ctr_addr(&self, ordinal: u32) -> Option<u64> {
        self.fixed_ctr.map(|ctr| ctr + self.instance_base(ordinal))
    }

    pub fn fixed_ctl_addr(&self, ordinal: u32) -> Option<u64> {
        self.fixed_ctl.map(|ctl| ctl + self.instance_base(ordinal))
    }

    /// Mask selecting the implemented bits of a programmable counter
    pub fn counter_mask(&self) -> u64 {
        width_mask(self.perf_ctr_bits)
    }

    pub fn fixed_counter_mask(&self) -> u64 {
        width_mask(self.fixed_ctr_bits)
    }
}

fn width_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Maps a PCI (vendor, device) id to the windowed box type it implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatch {
    pub vendor: u16,
    pub device: u16,
    /// Index into the platform's windowed box-type table
    pub type_index: usize,
    /// Instance number the hardware documentation gives this device.
    /// Informational: ordinals follow discovery order.
    pub ordinal_hint: u32,
}

impl DeviceMatch {
    pub const fn new(vendor: u16, device: u16, type_index: usize, ordinal_hint: u32) -> Self {
        Self {
            vendor,
            device,
            type_index,
            ordinal_hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRIDED: BoxType = BoxType {
        num_counters: 4,
        num_boxes: 18,
        perf_ctl: 0xE01,
        perf_ctr: 0xE08,
        box_ctl: Some(0xE00),
        box_stride: 0x10,
        ..BoxType::new("C-BOX", Backend::Local)
    };

    const WINDOWED: BoxType = BoxType {
        num_counters: 4,
        num_boxes: 2,
        perf_ctl: 0xD8,
        perf_ctr: 0xA0,
        box_ctl: Some(0xF4),
        ..BoxType::new("HA", Backend::Windowed)
    };

    #[test]
    fn test_local_addresses_follow_stride() {
        assert_eq!(STRIDED.box_ctl_addr(0), Some(0xE00));
        assert_eq!(STRIDED.box_ctl_addr(3), Some(0xE30));
        assert_eq!(STRIDED.event_ctl_addr(1, 2), Some(0xE13));
        assert_eq!(STRIDED.counter_addr(2, 3), Some(0xE2B));
    }

    #[test]
    fn test_windowed_addresses_ignore_ordinal() {
        assert_eq!(WINDOWED.box_ctl_addr(1), Some(0xF4));
        assert_eq!(WINDOWED.event_ctl_addr(1, 1), Some(0xDC));
        assert_eq!(WINDOWED.counter_addr(0, 2), Some(0xB0));
    }

    #[test]
    fn test_counter_index_out_of_range() {
        assert_eq!(STRIDED.counter_addr(0, 4), None);
        assert_eq!(STRIDED.event_ctl_addr(0, 4), None);
    }

    #[test]
    fn test_absent_registers() {
        assert_eq!(STRIDED.fixed_ctr_addr(0), None);
        assert_eq!(STRIDED.box_status_addr(0), None);
    }

    #[test]
    fn test_counter_masks() {
        assert_eq!(STRIDED.counter_mask(), 0xFFFF_FFFF_FFFF);
        assert_eq!(STRIDED.fixed_counter_mask(), 0);
    }
}
