//! Box-level control and event-select register layouts
//!
//! Both layouts are shared by every Xeon uncore box since Sandy Bridge-EP,
//! regardless of whether the box sits behind MSRs or PCI configuration space.
//!
//! ## Box Control Format
//!
//! | Bits | Field          | Description                              |
//! |------|----------------|------------------------------------------|
//! | 0    | reset_control  | Reset all counter control registers      |
//! | 1    | reset_counters | Reset all counters to 0                  |
//! | 8    | freeze         | Freeze all counters in this box          |
//!
//! ## Event Select Format
//!
//! | Bits  | Field        | Description                           |
//! |-------|--------------|---------------------------------------|
//! | 0-7   | event_select | Event code to count                   |
//! | 8-15  | unit_mask    | Event sub-select (umask)              |
//! | 17    | reset        | Reset this counter                    |
//! | 18    | edge_detect  | Count rising edges instead of levels  |
//! | 22    | enable       | Enable counter                        |
//! | 23    | invert       | Invert threshold comparison           |
//! | 24-31 | threshold    | Threshold for filtering               |
//!
//! Boxes with a fixed-function counter (U-box UCLK, IMC DCLK) gate it with a
//! separate control register whose only field is the enable bit (22).

use crate::register::{RegisterError, RegisterLayout};

/// Box-level control register layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoxControl {
    pub reset_control: bool,
    pub reset_counters: bool,
    pub freeze: bool,
}

impl BoxControl {
    pub const RESET_CONTROL: u64 = 1 << 0;
    pub const RESET_COUNTERS: u64 = 1 << 1;
    pub const FREEZE: u64 = 1 << 8;

    /// Reset pattern written by `init_box`
    pub const INIT: u64 = Self::RESET_CONTROL | Self::RESET_COUNTERS;

    pub const fn init() -> Self {
        Self {
            reset_control: true,
            reset_counters: true,
            freeze: false,
        }
    }
}

impl RegisterLayout for BoxControl {
    fn to_raw(&self) -> u64 {
        let mut value = 0u64;
        if self.reset_control {
            value |= Self::RESET_CONTROL;
        }
        if self.reset_counters {
            value |= Self::RESET_COUNTERS;
        }
        if self.freeze {
            value |= Self::FREEZE;
        }
        value
    }

    fn from_raw(value: u64) -> Self {
        Self {
            reset_control: (value & Self::RESET_CONTROL) != 0,
            reset_counters: (value & Self::RESET_COUNTERS) != 0,
            freeze: (value & Self::FREEZE) != 0,
        }
    }
}

/// Per-counter event select register layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSelect {
    pub event_select: u8,
    pub unit_mask: u8,
    pub reset: bool,
    pub edge_detect: bool,
    pub enable: bool,
    pub invert: bool,
    pub threshold: u8,
}

impl EventSelect {
    pub const ENABLE: u64 = 1 << 22;

    pub fn new(event_select: u8, unit_mask: u8) -> Self {
        Self {
            event_select,
            unit_mask,
            enable: true,
            ..Default::default()
        }
    }

    /// The same selection with the enable bit cleared
    pub fn disabled(&self) -> Self {
        Self {
            enable: false,
            ..*self
        }
    }

    /// Check the threshold against the width a box type implements
    pub fn check_threshold(&self, bits: u32) -> Result<(), RegisterError> {
        if bits < 8 && (self.threshold as u64) >> bits != 0 {
            return Err(RegisterError::FieldOverflow {
                field: "threshold",
                value: self.threshold as u64,
                bits,
            });
        }
        Ok(())
    }

    /// Check the encoded value against a box type's legal event-select bits.
    /// A zero mask places no restriction.
    pub fn check_mask(&self, mask: u64) -> Result<(), RegisterError> {
        let bits = self.to_raw() & !Self::ENABLE;
        if mask != 0 && bits & !mask != 0 {
            return Err(RegisterError::OutsideEventMask { bits, mask });
        }
        Ok(())
    }
}

impl RegisterLayout for EventSelect {
    fn to_raw(&self) -> u64 {
        let mut value = self.event_select as u64;
        value |= (self.unit_mask as u64) << 8;
        if self.reset {
            value |= 1 << 17;
        }
        if self.edge_detect {
            value |= 1 << 18;
        }
        if self.enable {
            value |= Self::ENABLE;
        }
        if self.invert {
            value |= 1 << 23;
        }
        value |= (self.threshold as u64) << 24;
        value
    }

    fn from_raw(value: u64) -> Self {
        Self {
            event_select: (value & 0xFF) as u8,
            unit_mask: ((value >> 8) & 0xFF) as u8,
            reset: (value & (1 << 17)) != 0,
            edge_detect: (value & (1 << 18)) != 0,
            enable: (value & Self::ENABLE) != 0,
            invert: (value & (1 << 23)) != 0,
            threshold: ((value >> 24) & 0xFF) as u8,
        }
    }

    // Invert applies to the threshold comparison, which is off at zero
    fn validate(&self) -> Result<(), RegisterError> {
        if self.invert && self.threshold == 0 {
            return Err(RegisterError::InvalidCombination(
                "invert requires a nonzero threshold",
            ));
        }
        Ok(())
    }
}

/// Fixed-function counter control register layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedControl {
    pub enable: bool,
}

impl FixedControl {
    pub const ENABLE: u64 = 1 << 22;
}

impl RegisterLayout for FixedControl {
    fn to_raw(&self) -> u64 {
        if self.enable {
            Self::ENABLE
        } else {
            0
        }
    }

    fn from_raw(value: u64) -> Self {
        Self {
            enable: (value & Self::ENABLE) != 0,
        }
    }
}
