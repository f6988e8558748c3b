use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::error::{Result, UncoreError};

/// Pins the calling thread to one CPU until dropped
///
/// Uncore MSRs are per-socket, so register traffic must be issued from a CPU
/// on the socket that owns the boxes.
pub struct AffinityGuard {
    cpu: u32,
    saved: CpuSet,
}

impl AffinityGuard {
    pub fn pin(cpu: u32) -> Result<Self> {
        let this_thread = Pid::from_raw(0);
        let saved = sched_getaffinity(this_thread).map_err(|e| {
            UncoreError::AffinityError(format!("cannot read affinity mask: {e}"))
        })?;

        let mut target = CpuSet::new();
        target
            .set(cpu as usize)
            .map_err(|e| UncoreError::AffinityError(format!("CPU {cpu} out of range: {e}")))?;

        sched_setaffinity(this_thread, &target).map_err(|e| {
            UncoreError::AffinityError(format!("cannot migrate to CPU {cpu}: {e}"))
        })?;

        Ok(Self { cpu, saved })
    }
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        if let Err(e) = sched_setaffinity(Pid::from_raw(0), &self.saved) {
            tracing::warn!("Failed to restore affinity after CPU {}: {}", self.cpu, e);
        }
    }
}
