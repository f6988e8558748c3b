use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use crate::common::affinity::AffinityGuard;
use crate::error::{Result, UncoreError};
use crate::uncore::backend::LocalRegisters;

/// MSR access through `/dev/cpu/<cpu>/msr`
pub struct MsrHandle {
    file: Mutex<File>,
    cpu_id: u32,
}

impl MsrHandle {
    pub fn new(cpu: u32) -> Result<Self> {
        let path = format!("/dev/cpu/{cpu}/msr");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|e| {
                UncoreError::MsrError(format!("Failed to open {path} for CPU {cpu}: {e}"))
            })?;

        tracing::info!("Opened MSR handle {} for core {}", file.as_raw_fd(), cpu);

        Ok(Self {
            file: Mutex::new(file),
            cpu_id: cpu,
        })
    }

    pub fn cpu_id(&self) -> u32 {
        self.cpu_id
    }

    fn seek(&self, file: &mut File, addr: u64) -> Result<()> {
        file.seek(SeekFrom::Start(addr)).map_err(|e| {
            UncoreError::MsrError(format!(
                "Failed to seek to MSR 0x{:X} on CPU {}: {}",
                addr, self.cpu_id, e
            ))
        })?;
        Ok(())
    }
}

impl LocalRegisters for MsrHandle {
    fn read(&self, addr: u64) -> Result<u64> {
        let _affinity = AffinityGuard::pin(self.cpu_id)?;
        let mut file = self.file.lock();
        self.seek(&mut file, addr)?;

        let mut buffer = [0u8; 8];
        file.read_exact(&mut buffer).map_err(|e| {
            UncoreError::MsrError(format!(
                "Failed to read MSR 0x{:X} on CPU {}: {}",
                addr, self.cpu_id, e
            ))
        })?;

        let value = u64::from_ne_bytes(buffer);
        tracing::debug!(
            "MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(value)
    }

    fn write(&self, addr: u64, value: u64) -> Result<()> {
        let _affinity = AffinityGuard::pin(self.cpu_id)?;
        let mut file = self.file.lock();
        self.seek(&mut file, addr)?;

        file.write_all(&value.to_ne_bytes()).map_err(|e| {
            UncoreError::MsrError(format!(
                "Failed to write MSR 0x{:X} on CPU {}: {}",
                addr, self.cpu_id, e
            ))
        })?;

        tracing::debug!(
            "MSR write: CPU {} MSR 0x{:08x} <- 0x{:016x}",
            self.cpu_id,
            addr,
            value
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_cpu_reports_msr_error() {
        let result = MsrHandle::new(u32::MAX);
        assert!(matches!(result, Err(UncoreError::MsrError(_))));
    }

    #[test]
    #[ignore] // Requires root and the msr module
    fn test_read_global_control() {
        let handle = MsrHandle::new(0).unwrap();
        let value = handle.read(uncore_raw::arch::haswell_ep::msr::PMON_GLOBAL_CTL);
        assert!(value.is_ok());
    }
}
