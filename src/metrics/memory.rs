//! Physical memory usage from /proc/meminfo, with sysinfo(2) as a backup for sizing.

use crate::snapshot::Usage;
use anyhow::{Context, Result};
use std::fs;

const PROC_MEMINFO: &str = "/proc/meminfo";

/// Assumed total when neither /proc/meminfo nor sysinfo(2) can size memory
pub const FALLBACK_TOTAL_BYTES: u64 = 16 * 1024 * 1024 * 1024;

/// Fields of interest from /proc/meminfo, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: Option<u64>,
    pub free: Option<u64>,
    pub available: Option<u64>,
    pub buffers: Option<u64>,
    pub cached: Option<u64>,
}

impl MemInfo {
    /// Bytes not available to new allocations.
    ///
    /// Kernels before 3.14 lack MemAvailable; fall back to free + buffers + cache.
    pub fn used(&self, total: u64) -> u64 {
        let reclaimable = match self.available {
            Some(available) => available,
            None => {
                self.free.unwrap_or(0) + self.buffers.unwrap_or(0) + self.cached.unwrap_or(0)
            }
        };
        total.saturating_sub(reclaimable)
    }
}

pub fn parse_meminfo(content: &str) -> MemInfo {
    let mut info = MemInfo::default();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let Ok(kb) = parts[1].parse::<u64>() else {
            continue;
        };
        let value = Some(kb * 1024);

        match parts[0] {
            "MemTotal:" => info.total = value,
            "MemFree:" => info.free = value,
            "MemAvailable:" => info.available = value,
            "Buffers:" => info.buffers = value,
            "Cached:" => info.cached = value,
            _ => {}
        }
    }

    info
}

/// Size physical memory: primary query, then secondary, then the fixed fallback.
pub fn resolve_total(primary: Option<u64>, secondary: impl FnOnce() -> Option<u64>) -> u64 {
    primary
        .filter(|&total| total > 0)
        .or_else(|| secondary().filter(|&total| total > 0))
        .unwrap_or(FALLBACK_TOTAL_BYTES)
}

#[derive(Debug, Default)]
pub struct MemoryCollector;

impl MemoryCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn collect(&self) -> Result<Usage> {
        let content = fs::read_to_string(PROC_MEMINFO).context("Failed to read /proc/meminfo")?;
        let info = parse_meminfo(&content);
        let total = resolve_total(info.total, sysinfo_total_ram);
        Ok(Usage::new(info.used(total), total))
    }
}

fn sysinfo_total_ram() -> Option<u64> {
    let mut info = std::mem::MaybeUninit::<libc::sysinfo>::zeroed();
    let rc = unsafe { libc::sysinfo(info.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let info = unsafe { info.assume_init() };
    Some((info.totalram as u64).saturating_mul(info.mem_unit as u64))
}
