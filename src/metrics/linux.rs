//! Linux metrics source backed by /proc and statvfs(2).

use super::cpu::CpuCollector;
use super::disk::DiskCollector;
use super::memory::MemoryCollector;
use super::{MetricsSource, SamplerError};
use crate::snapshot::Snapshot;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub struct LinuxMetricsSource {
    cpu: CpuCollector,
    memory: MemoryCollector,
    disk: DiskCollector,
}

impl LinuxMetricsSource {
    /// Open the counters and let the CPU counter settle.
    ///
    /// Blocks for `settle`. Fails with [`SamplerError::UnsupportedPlatform`]
    /// when /proc/stat or /proc/meminfo cannot be read.
    pub fn new(settle: Duration, disk_path: impl Into<PathBuf>) -> Result<Self, SamplerError> {
        let mut cpu = CpuCollector::new();
        cpu.prime()
            .map_err(|e| SamplerError::UnsupportedPlatform(format!("CPU counters unavailable: {e:#}")))?;

        let memory = MemoryCollector::new();
        memory
            .collect()
            .map_err(|e| SamplerError::UnsupportedPlatform(format!("memory counters unavailable: {e:#}")))?;

        std::thread::sleep(settle);

        let disk = DiskCollector::new(disk_path);
        debug!(disk = %disk.path().display(), settle_ms = settle.as_millis() as u64, "linux metrics source ready");

        Ok(Self { cpu, memory, disk })
    }
}

impl MetricsSource for LinuxMetricsSource {
    fn is_supported(&self) -> bool {
        self.cpu.is_primed()
    }

    fn sample(&mut self) -> Result<Snapshot, SamplerError> {
        let cpu = self.cpu.collect().map_err(SamplerError::failure("cpu"))?;
        let ram = self.memory.collect().map_err(SamplerError::failure("memory"))?;
        let disk = self.disk.collect().map_err(SamplerError::failure("disk"))?;
        Ok(Snapshot::new(cpu, ram, disk))
    }
}
