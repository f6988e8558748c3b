// In-memory register files standing in for MSRs and PCI devices.
// Registers behave as plain storage: no counting, no reset side effects.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::uncore::backend::{ConfigSpace, DeviceBus, DeviceLocation, LocalRegisters};
use crate::uncore::PlatformProfile;

#[derive(Debug, Default)]
pub struct SimMsr {
    regs: Mutex<HashMap<u64, u64>>,
    writes: AtomicUsize,
}

impl SimMsr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: u64) -> u64 {
        self.regs.lock().get(&addr).copied().unwrap_or(0)
    }

    /// Set a register without counting it as a write
    pub fn set(&self, addr: u64, value: u64) {
        self.regs.lock().insert(addr, value);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl LocalRegisters for SimMsr {
    fn read(&self, addr: u64) -> Result<u64> {
        Ok(self.get(addr))
    }

    fn write(&self, addr: u64, value: u64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.set(addr, value);
        Ok(())
    }
}

/// Simulated PCI function. Clones share the same configuration space.
#[derive(Debug, Clone)]
pub struct SimDevice {
    location: DeviceLocation,
    regs: Arc<Mutex<HashMap<u32, u32>>>,
}

impl SimDevice {
    pub fn new(location: DeviceLocation) -> Self {
        Self {
            location,
            regs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Location on the socket-0 uncore bus for the `index`-th simulated device
    pub fn location_for(device_id: u16, index: usize) -> DeviceLocation {
        DeviceLocation {
            segment: 0,
            bus: 0x7F,
            device: 0x08 + (index / 8) as u8,
            function: (index % 8) as u8,
            vendor_id: 0x8086,
            device_id,
        }
    }

    pub fn get(&self, offset: u32) -> u32 {
        self.regs.lock().get(&offset).copied().unwrap_or(0)
    }

    pub fn set(&self, offset: u32, value: u32) {
        self.regs.lock().insert(offset, value);
    }

    /// Number of live handles onto this configuration space
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.regs)
    }
}

impl ConfigSpace for SimDevice {
    fn read32(&self, offset: u32) -> Result<u32> {
        Ok(self.get(offset))
    }

    fn write32(&self, offset: u32, value: u32) -> Result<()> {
        self.set(offset, value);
        Ok(())
    }

    fn location(&self) -> DeviceLocation {
        self.location
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimBus {
    devices: Vec<SimDevice>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// One device for every entry of the profile's device match table
    pub fn from_profile(profile: &PlatformProfile) -> Self {
        let mut bus = Self::new();
        for (index, entry) in profile.device_matches().iter().enumerate() {
            let mut location = SimDevice::location_for(entry.device, index);
            location.vendor_id = entry.vendor;
            bus.add(SimDevice::new(location));
        }
        bus
    }

    pub fn add(&mut self, device: SimDevice) -> SimDevice {
        self.devices.push(device.clone());
        device
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceBus for SimBus {
    type Device = SimDevice;

    fn find_devices(&self, vendor: u16, device: u16) -> Vec<SimDevice> {
        self.devices
            .iter()
            .filter(|d| d.location.vendor_id == vendor && d.location.device_id == device)
            .cloned()
            .collect()
    }
}
