// Enumeration dump: what hardware was found, per box type.
// Operators read this to confirm the topology before sampling.

use std::fmt;

use uncore_raw::Backend;

use crate::uncore::backend::DeviceLocation;
use crate::uncore::platform::PlatformId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxEntry {
    pub ordinal: u32,
    pub location: Option<DeviceLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub name: &'static str,
    pub declared: u32,
    pub boxes: Vec<BoxEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationDump {
    pub platform: PlatformId,
    pub windowed: Vec<TypeEntry>,
    pub local: Vec<TypeEntry>,
}

impl EnumerationDump {
    pub fn types(&self, backend: Backend) -> &[TypeEntry] {
        match backend {
            Backend::Local => &self.local,
            Backend::Windowed => &self.windowed,
        }
    }

    pub fn total_boxes(&self) -> usize {
        self.local
            .iter()
            .chain(&self.windowed)
            .map(|t| t.boxes.len())
            .sum()
    }
}

impl fmt::Display for EnumerationDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Platform: {}", self.platform)?;

        for backend in [Backend::Windowed, Backend::Local] {
            writeln!(f, "{} boxes:", backend)?;
            let types = self.types(backend);
            if types.is_empty() {
                writeln!(f, "  (none)")?;
            }
            for entry in types {
                writeln!(
                    f,
                    "  Name: {} ({}/{} present)",
                    entry.name,
                    entry.boxes.len(),
                    entry.declared
                )?;
                for b in &entry.boxes {
                    match &b.location {
                        Some(location) => writeln!(f, "        Box{}  {}", b.ordinal, location)?,
                        None => writeln!(f, "        Box{}", b.ordinal)?,
                    }
                }
            }
        }
        Ok(())
    }
}
