use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, UncoreError};
use crate::uncore::backend::{ConfigSpace, DeviceBus, DeviceLocation};

pub struct PciHandle {
    file: Mutex<File>,
    location: DeviceLocation,
}

impl PciHandle {
    pub fn new(root: &Path, location: DeviceLocation) -> Result<Self> {
        let path = Self::pci_path(root, &location);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                UncoreError::PciError(format!(
                    "Failed to open PCI device {:04X}:{:02X}:{:02X}.{}: {}",
                    location.segment, location.bus, location.device, location.function, e
                ))
            })?;

        Ok(Self {
            file: Mutex::new(file),
            location,
        })
    }

    fn pci_path(root: &Path, location: &DeviceLocation) -> PathBuf {
        if location.segment > 0 {
            root.join(format!("{:04x}:{:02x}", location.segment, location.bus))
                .join(format!("{:02x}.{}", location.device, location.function))
        } else {
            root.join(format!("{:02x}", location.bus))
                .join(format!("{:02x}.{}", location.device, location.function))
        }
    }

    pub fn read32(&self, offset: u32) -> Result<u32> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64)).map_err(|e| {
            UncoreError::PciError(format!(
                "Failed to seek to offset {offset:#x} on {}: {e}",
                self.location
            ))
        })?;

        let mut buffer = [0u8; 4];
        file.read_exact(&mut buffer).map_err(|e| {
            UncoreError::PciError(format!(
                "Failed to read at offset {offset:#x} on {}: {e}",
                self.location
            ))
        })?;

        Ok(u32::from_le_bytes(buffer))
    }

    pub fn write32(&self, offset: u32, value: u32) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64)).map_err(|e| {
            UncoreError::PciError(format!(
                "Failed to seek to offset {offset:#x} on {}: {e}",
                self.location
            ))
        })?;

        file.write_all(&value.to_le_bytes()).map_err(|e| {
            UncoreError::PciError(format!(
                "Failed to write at offset {offset:#x} on {}: {e}",
                self.location
            ))
        })?;

        tracing::debug!(
            "PCI write: {} offset 0x{:03x} <- 0x{:08x}",
            self.location,
            offset,
            value
        );
        Ok(())
    }
}

/// An opened PCI function bound to an uncore box
pub struct PciDevice {
    handle: PciHandle,
}

impl ConfigSpace for PciDevice {
    fn read32(&self, offset: u32) -> Result<u32> {
        self.handle.read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) -> Result<()> {
        self.handle.write32(offset, value)
    }

    fn location(&self) -> DeviceLocation {
        self.handle.location
    }
}

impl Drop for PciDevice {
    fn drop(&mut self) {
        tracing::debug!("Released PCI device {}", self.handle.location);
    }
}

/// PCI functions found under the procfs tree
pub struct PciBus {
    root: PathBuf,
    functions: Vec<DeviceLocation>,
}

impl PciBus {
    /// Walk `<root>/[SSSS:]BB/DD.F`, reading vendor and device ids from each
    /// function's configuration header. Functions are kept in address order.
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let entries = std::fs::read_dir(&root).map_err(|e| {
            UncoreError::PciError(format!("Failed to list PCI devices under {}: {e}", root.display()))
        })?;

        let mut functions = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some((segment, bus)) = name.to_str().and_then(parse_bus_dir) else {
                continue;
            };
            functions.extend(scan_bus(&entry.path(), segment, bus));
        }
        functions.sort_by_key(|loc| (loc.segment, loc.bus, loc.device, loc.function));

        tracing::info!("Found {} PCI functions under {}", functions.len(), root.display());
        Ok(Self { root, functions })
    }

    /// A bus with no devices; windowed enumeration finds nothing
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            functions: Vec::new(),
        }
    }
}

impl DeviceBus for PciBus {
    type Device = PciDevice;

    fn find_devices(&self, vendor: u16, device: u16) -> Vec<PciDevice> {
        self.functions
            .iter()
            .filter(|loc| loc.vendor_id == vendor && loc.device_id == device)
            .filter_map(|loc| match PciHandle::new(&self.root, *loc) {
                Ok(handle) => Some(PciDevice { handle }),
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", loc, e);
                    None
                }
            })
            .collect()
    }
}

fn scan_bus(dir: &Path, segment: u16, bus: u8) -> Vec<DeviceLocation> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Skipping PCI bus directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let (device, function) = name.to_str().and_then(parse_function_file)?;

            let mut header = [0u8; 4];
            if let Err(e) = File::open(entry.path()).and_then(|mut f| f.read_exact(&mut header)) {
                tracing::debug!("Cannot read PCI header {}: {}", entry.path().display(), e);
                return None;
            }
            let ids = u32::from_le_bytes(header);

            Some(DeviceLocation {
                segment,
                bus,
                device,
                function,
                vendor_id: (ids & 0xFFFF) as u16,
                device_id: (ids >> 16) as u16,
            })
        })
        .collect()
}

/// Bus directory name: `BB` on segment 0, `SSSS:BB` elsewhere
fn parse_bus_dir(name: &str) -> Option<(u16, u8)> {
    match name.split_once(':') {
        Some((segment, bus)) if segment.len() == 4 && bus.len() == 2 => Some((
            u16::from_str_radix(segment, 16).ok()?,
            u8::from_str_radix(bus, 16).ok()?,
        )),
        None if name.len() == 2 => Some((0, u8::from_str_radix(name, 16).ok()?)),
        _ => None,
    }
}

/// Function file name: `DD.F`
fn parse_function_file(name: &str) -> Option<(u8, u8)> {
    let (device, function) = name.split_once('.')?;
    let device = u8::from_str_radix(device, 16).ok()?;
    let function = function.parse::<u8>().ok()?;
    (device < 32 && function < 8).then_some((device, function))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(segment: u16, bus: u8, device: u8, function: u8) -> DeviceLocation {
        DeviceLocation {
            segment,
            bus,
            device,
            function,
            vendor_id: 0x8086,
            device_id: 0x2F30,
        }
    }

    // Builds a fake procfs tree; each function file holds its vendor/device header
    fn fake_tree(name: &str, functions: &[(&str, &str, u32)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("uncore-pci-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        for (bus, function, ids) in functions {
            let dir = root.join(bus);
            std::fs::create_dir_all(&dir).unwrap();
            let mut header = ids.to_le_bytes().to_vec();
            header.resize(256, 0);
            std::fs::write(dir.join(function), header).unwrap();
        }
        std::fs::write(root.join("devices"), "").unwrap();
        root
    }

    #[test]
    fn test_parse_bus_dir() {
        assert_eq!(parse_bus_dir("7f"), Some((0, 0x7F)));
        assert_eq!(parse_bus_dir("0001:ff"), Some((1, 0xFF)));
        assert_eq!(parse_bus_dir("devices"), None);
        assert_eq!(parse_bus_dir("1:7f"), None);
    }

    #[test]
    fn test_parse_function_file() {
        assert_eq!(parse_function_file("12.1"), Some((0x12, 1)));
        assert_eq!(parse_function_file("1f.7"), Some((0x1F, 7)));
        assert_eq!(parse_function_file("20.0"), None);
        assert_eq!(parse_function_file("12.8"), None);
        assert_eq!(parse_function_file("12"), None);
    }

    #[test]
    fn test_scan_reads_ids_and_segments() {
        let root = fake_tree(
            "scan",
            &[
                ("0001:7f", "12.1", 0x2F30_8086),
                ("7f", "14.0", 0x2FB0_8086),
                ("7f", "12.1", 0x2F30_8086),
            ],
        );

        let bus = PciBus::scan(&root).unwrap();
        std::fs::remove_dir_all(&root).unwrap();

        assert_eq!(bus.functions.len(), 3);
        assert_eq!(bus.functions[0], location(0, 0x7F, 0x12, 1));
        assert_eq!(bus.functions[1].device_id, 0x2FB0);
        assert_eq!(bus.functions[2], location(1, 0x7F, 0x12, 1));
    }

    #[test]
    fn test_pci_path_layout() {
        let mut loc = location(0, 0x7F, 0x12, 1);
        assert_eq!(
            PciHandle::pci_path(Path::new("/proc/bus/pci"), &loc),
            PathBuf::from("/proc/bus/pci/7f/12.1")
        );

        loc.segment = 1;
        assert_eq!(
            PciHandle::pci_path(Path::new("/proc/bus/pci"), &loc),
            PathBuf::from("/proc/bus/pci/0001:7f/12.1")
        );
    }

    #[test]
    fn test_scanned_function_opens_at_its_segment() {
        let root = fake_tree("open", &[("0002:3f", "08.0", 0x2F30_8086)]);

        let bus = PciBus::scan(&root).unwrap();
        let devices = bus.find_devices(0x8086, 0x2F30);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].location().segment, 2);
        assert_eq!(devices[0].read32(0).unwrap(), 0x2F30_8086);

        drop(devices);
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let result = PciBus::scan("/nonexistent/pci");
        assert!(matches!(result, Err(UncoreError::PciError(_))));
    }

    #[test]
    fn test_empty_bus_finds_nothing() {
        let bus = PciBus::empty("/proc/bus/pci");
        assert!(bus.find_devices(0x8086, 0x2F30).is_empty());
        assert!(bus.functions.is_empty());
    }
}
