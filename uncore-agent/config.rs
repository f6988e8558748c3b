use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, UncoreError};
use crate::uncore::PlatformId;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// CPU whose MSR device issues local register traffic
    pub cpu: u32,
    /// Platform override; `None` means detect from CPUID
    pub platform: Option<PlatformId>,
    /// Root of the procfs PCI tree
    pub pci_root: PathBuf,
    /// Use in-memory registers instead of hardware
    pub simulate: bool,
}

impl AgentConfig {
    pub fn new(cpu: u32) -> Self {
        Self {
            cpu,
            platform: None,
            pci_root: Self::default_pci_root(),
            simulate: false,
        }
    }

    /// Pick the first online CPU and the default PCI root
    pub fn auto_detect() -> Self {
        let cpus = Self::detect_online_cpus();
        let cpu = cpus.first().copied().unwrap_or(0);

        tracing::info!("Auto-detected {} online CPUs, using CPU {}", cpus.len(), cpu);

        Self::new(cpu)
    }

    pub fn default_pci_root() -> PathBuf {
        if std::env::var("DOCKER_RUNNING").is_ok() {
            PathBuf::from("/pcm/proc/bus/pci")
        } else {
            PathBuf::from("/proc/bus/pci")
        }
    }

    /// Detect online CPUs from /sys/devices/system/cpu/online
    pub fn detect_online_cpus() -> Vec<u32> {
        std::fs::read_to_string("/sys/devices/system/cpu/online")
            .ok()
            .and_then(|s| parse_cpu_list(&s))
            .unwrap_or_else(|| {
                tracing::warn!("Failed to detect online CPUs, using default: 0");
                vec![0]
            })
    }
}

/// Parse CPU list like "0-3,8-11"
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.parse().ok()?;
            let end: u32 = end.parse().ok()?;
            cpus.extend(start..=end);
        } else {
            cpus.push(part.parse().ok()?);
        }
    }
    Some(cpus)
}

/// Parse a register value written as decimal or `0x`-prefixed hex
pub fn parse_number(s: &str) -> Result<u64> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| UncoreError::ParseError(format!("invalid number '{s}': {e}")))
}

/// Event armed on every box of a type: `TYPE:COUNTER:EVENT[:UMASK]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub box_type: String,
    pub counter: u32,
    pub event: u8,
    pub umask: u8,
}

impl FromStr for EventSpec {
    type Err = UncoreError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(':').collect();
        if !(3..=4).contains(&fields.len()) {
            return Err(UncoreError::ParseError(format!(
                "event '{s}' must look like TYPE:COUNTER:EVENT[:UMASK]"
            )));
        }

        let byte = |field: &str| -> Result<u8> {
            let value = parse_number(field)?;
            u8::try_from(value)
                .map_err(|_| UncoreError::ParseError(format!("'{field}' does not fit in 8 bits")))
        };

        let counter = u32::try_from(parse_number(fields[1])?)
            .map_err(|_| UncoreError::ParseError(format!("counter '{}' too large", fields[1])))?;

        Ok(Self {
            box_type: fields[0].to_string(),
            counter,
            event: byte(fields[2])?,
            umask: match fields.get(3) {
                Some(field) => byte(field)?,
                None => 0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8\n"), Some(vec![0, 1, 2, 3, 8]));
        assert_eq!(parse_cpu_list("x"), None);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x34").unwrap(), 0x34);
        assert_eq!(parse_number("52").unwrap(), 52);
        assert!(parse_number("0xZZ").is_err());
    }

    #[test]
    fn test_event_spec_parse() {
        let spec: EventSpec = "C-BOX:1:0x34:0x03".parse().unwrap();
        assert_eq!(spec.box_type, "C-BOX");
        assert_eq!(spec.counter, 1);
        assert_eq!(spec.event, 0x34);
        assert_eq!(spec.umask, 0x03);

        let spec: EventSpec = "PCU-BOX:0:0x00".parse().unwrap();
        assert_eq!(spec.umask, 0);
    }

    #[test]
    fn test_event_spec_rejects_bad_input() {
        assert!("C-BOX:0".parse::<EventSpec>().is_err());
        assert!("C-BOX:0:0x1FF".parse::<EventSpec>().is_err());
        assert!("C-BOX:a:0x34".parse::<EventSpec>().is_err());
    }
}
