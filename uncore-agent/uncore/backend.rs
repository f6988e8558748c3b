// Register transports and the box operation set.
// Both backends run the same operations; they differ only in how a register
// address becomes a hardware transaction, which RegisterWindow captures.

use std::fmt;
use std::sync::Arc;

use uncore_raw::{Backend, BoxControl, BoxType, FixedControl, RegisterLayout};

use crate::error::{Result, UncoreError};
use crate::uncore::event::Event;

/// Globally addressed register file (MSRs)
pub trait LocalRegisters: Send + Sync {
    fn read(&self, addr: u64) -> Result<u64>;
    fn write(&self, addr: u64, value: u64) -> Result<()>;
}

/// Configuration space of one discovered device
pub trait ConfigSpace: Send + Sync {
    fn read32(&self, offset: u32) -> Result<u32>;
    fn write32(&self, offset: u32, value: u32) -> Result<()>;
    fn location(&self) -> DeviceLocation;

    /// 64-bit counters are exposed as two consecutive dwords, low first
    fn read64(&self, offset: u32) -> Result<u64> {
        let lo = self.read32(offset)? as u64;
        let hi = self.read32(offset + 4)? as u64;
        Ok((hi << 32) | lo)
    }
}

/// Source of devices for windowed enumeration
pub trait DeviceBus {
    type Device: ConfigSpace;

    /// All present devices carrying this id, in bus order
    fn find_devices(&self, vendor: u16, device: u16) -> Vec<Self::Device>;
}

impl<T: LocalRegisters + ?Sized> LocalRegisters for Arc<T> {
    fn read(&self, addr: u64) -> Result<u64> {
        (**self).read(addr)
    }

    fn write(&self, addr: u64, value: u64) -> Result<()> {
        (**self).write(addr, value)
    }
}

/// Bus position and identity of a PCI function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceLocation {
    pub segment: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub vendor_id: u16,
    pub device_id: u16,
}

impl fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{} [{:04x}:{:04x}]",
            self.segment, self.bus, self.device, self.function, self.vendor_id, self.device_id
        )
    }
}

/// The address space a box's registers live in
pub enum RegisterWindow<'a, L, D> {
    Local(&'a L),
    Windowed(&'a D),
}

impl<L: LocalRegisters, D: ConfigSpace> RegisterWindow<'_, L, D> {
    pub fn backend(&self) -> Backend {
        match self {
            RegisterWindow::Local(_) => Backend::Local,
            RegisterWindow::Windowed(_) => Backend::Windowed,
        }
    }

    /// Read a control or status register
    pub fn read(&self, addr: u64) -> Result<u64> {
        match self {
            RegisterWindow::Local(regs) => regs.read(addr),
            RegisterWindow::Windowed(dev) => Ok(dev.read32(offset(addr)?)? as u64),
        }
    }

    /// Write a control register; windowed registers take the low 32 bits
    pub fn write(&self, addr: u64, value: u64) -> Result<()> {
        match self {
            RegisterWindow::Local(regs) => regs.write(addr, value),
            RegisterWindow::Windowed(dev) => dev.write32(offset(addr)?, value as u32),
        }
    }

    /// Read a full-width counter register
    pub fn read_counter(&self, addr: u64) -> Result<u64> {
        match self {
            RegisterWindow::Local(regs) => regs.read(addr),
            RegisterWindow::Windowed(dev) => dev.read64(offset(addr)?),
        }
    }
}

fn offset(addr: u64) -> Result<u32> {
    u32::try_from(addr).map_err(|_| {
        UncoreError::InvalidConfiguration(format!(
            "configuration space offset {addr:#x} out of range"
        ))
    })
}

/// Write the reset pattern to the box control register
pub fn init_box<L: LocalRegisters, D: ConfigSpace>(
    window: &RegisterWindow<'_, L, D>,
    box_type: &BoxType,
    ordinal: u32,
) -> Result<()> {
    let Some(ctl) = box_type.box_ctl_addr(ordinal) else {
        tracing::trace!("{}#{} has no box control, init skipped", box_type.name, ordinal);
        return Ok(());
    };
    window.write(ctl, BoxControl::init().to_raw())
}

/// Clear the freeze bit, leaving every other bit untouched
pub fn enable_box<L: LocalRegisters, D: ConfigSpace>(
    window: &RegisterWindow<'_, L, D>,
    box_type: &BoxType,
    ordinal: u32,
) -> Result<()> {
    update_freeze(window, box_type, ordinal, false)
}

/// Set the freeze bit, leaving counter values and other bits untouched
pub fn disable_box<L: LocalRegisters, D: ConfigSpace>(
    window: &RegisterWindow<'_, L, D>,
    box_type: &BoxType,
    ordinal: u32,
) -> Result<()> {
    update_freeze(window, box_type, ordinal, true)
}

fn update_freeze<L: LocalRegisters, D: ConfigSpace>(
    window: &RegisterWindow<'_, L, D>,
    box_type: &BoxType,
    ordinal: u32,
    freeze: bool,
) -> Result<()> {
    let Some(ctl) = box_type.box_ctl_addr(ordinal) else {
        tracing::trace!("{}#{} has no box control, freeze skipped", box_type.name, ordinal);
        return Ok(());
    };

    let config = window.read(ctl)?;
    let updated = if freeze {
        config | BoxControl::FREEZE
    } else {
        config & !BoxControl::FREEZE
    };
    window.write(ctl, updated)
}

/// Set the enable bit of the fixed-function counter control
pub fn enable_fixed_counter<L: LocalRegisters, D: ConfigSpace>(
    window: &RegisterWindow<'_, L, D>,
    box_type: &BoxType,
    ordinal: u32,
) -> Result<()> {
    update_fixed_enable(window, box_type, ordinal, true)
}

/// Clear the enable bit; the fixed counter keeps its value
pub fn disable_fixed_counter<L: LocalRegisters, D: ConfigSpace>(
    window: &RegisterWindow<'_, L, D>,
    box_type: &BoxType,
    ordinal: u32,
) -> Result<()> {
    update_fixed_enable(window, box_type, ordinal, false)
}

fn update_fixed_enable<L: LocalRegisters, D: ConfigSpace>(
    window: &RegisterWindow<'_, L, D>,
    box_type: &BoxType,
    ordinal: u32,
    enable: bool,
) -> Result<()> {
    let Some(ctl) = box_type.fixed_ctl_addr(ordinal) else {
        tracing::trace!("{}#{} has no fixed counter", box_type.name, ordinal);
        return Ok(());
    };

    let config = window.read(ctl)? & !FixedControl::ENABLE;
    window.write(ctl, config | FixedControl { enable }.to_raw())
}

/// Write the event's enable pattern to its control register
pub fn enable_event<L: LocalRegisters, D: ConfigSpace>(
    window: &RegisterWindow<'_, L, D>,
    event: &Event,
) -> Result<()> {
    window.write(event.ctl, event.enable)
}

/// Write the event's disable pattern; the counter keeps its value
pub fn disable_event<L: LocalRegisters, D: ConfigSpace>(
    window: &RegisterWindow<'_, L, D>,
    event: &Event,
) -> Result<()> {
    window.write(event.ctl, event.disable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sim::{SimDevice, SimMsr};
    use uncore_raw::arch::haswell_ep::{msr, pci};

    fn local(regs: &SimMsr) -> RegisterWindow<'_, SimMsr, SimDevice> {
        RegisterWindow::Local(regs)
    }

    #[test]
    fn test_init_box_writes_reset_pattern_at_instance_address() {
        let regs = SimMsr::new();
        init_box(&local(&regs), &msr::CBOX, 2).unwrap();
        assert_eq!(regs.get(0xE20), BoxControl::INIT);
        assert_eq!(regs.get(0xE00), 0);
    }

    #[test]
    fn test_box_ops_without_box_ctl_are_noops() {
        let regs = SimMsr::new();
        let window = local(&regs);
        init_box(&window, &msr::UBOX, 0).unwrap();
        enable_box(&window, &msr::UBOX, 0).unwrap();
        disable_box(&window, &msr::UBOX, 0).unwrap();
        assert_eq!(regs.write_count(), 0);
    }

    #[test]
    fn test_freeze_preserves_other_bits() {
        let regs = SimMsr::new();
        regs.set(0x710, 0xF0);
        let window = local(&regs);

        disable_box(&window, &msr::PCUBOX, 0).unwrap();
        assert_eq!(regs.get(0x710), 0x1F0);

        enable_box(&window, &msr::PCUBOX, 0).unwrap();
        assert_eq!(regs.get(0x710), 0xF0);
    }

    #[test]
    fn test_fixed_counter_enable_round_trip() {
        let regs = SimMsr::new();
        regs.set(msr::ubox::UCLK_FIXED_CTL, 0x10_0000);
        let window = local(&regs);

        enable_fixed_counter(&window, &msr::UBOX, 0).unwrap();
        assert_eq!(regs.get(msr::ubox::UCLK_FIXED_CTL), 0x50_0000);

        disable_fixed_counter(&window, &msr::UBOX, 0).unwrap();
        assert_eq!(regs.get(msr::ubox::UCLK_FIXED_CTL), 0x10_0000);
    }

    #[test]
    fn test_fixed_counter_ops_without_fixed_ctl_are_noops() {
        let regs = SimMsr::new();
        enable_fixed_counter(&local(&regs), &msr::CBOX, 3).unwrap();
        disable_fixed_counter(&local(&regs), &msr::CBOX, 3).unwrap();
        assert_eq!(regs.write_count(), 0);
    }

    #[test]
    fn test_windowed_control_writes_are_32_bit() {
        let dev = SimDevice::new(SimDevice::location_for(0x2F30, 0));
        let window: RegisterWindow<'_, SimMsr, SimDevice> = RegisterWindow::Windowed(&dev);

        window.write(0xD8, 0x1_0040_0001).unwrap();
        assert_eq!(dev.get(0xD8), 0x0040_0001);

        init_box(&window, &pci::HA, 1).unwrap();
        assert_eq!(dev.get(0xF4), BoxControl::INIT as u32);
    }

    #[test]
    fn test_windowed_counter_reads_two_dwords() {
        let dev = SimDevice::new(SimDevice::location_for(0x2FB0, 0));
        dev.set(0xA0, 0xDEAD_BEEF);
        dev.set(0xA4, 0x1234);

        let window: RegisterWindow<'_, SimMsr, SimDevice> = RegisterWindow::Windowed(&dev);
        assert_eq!(window.read_counter(0xA0).unwrap(), 0x1234_DEAD_BEEF);
    }

    #[test]
    fn test_device_location_display() {
        let loc = DeviceLocation {
            segment: 0,
            bus: 0x7F,
            device: 0x12,
            function: 1,
            vendor_id: 0x8086,
            device_id: 0x2F30,
        };
        assert_eq!(loc.to_string(), "0000:7f:12.1 [8086:2f30]");
    }
}
