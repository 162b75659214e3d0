//! CPU utilization from the aggregate line of /proc/stat.

use anyhow::{bail, Context, Result};
use std::fs;

const PROC_STAT: &str = "/proc/stat";

/// Raw CPU time values from /proc/stat, in jiffies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// Delta-based CPU counter.
///
/// The kernel only exposes cumulative jiffies, so a reading is meaningless
/// until a previous one exists. [`CpuCollector::prime`] takes that first
/// reading and throws its value away.
#[derive(Debug, Default)]
pub struct CpuCollector {
    prev: Option<CpuTimes>,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the discard-first baseline reading.
    pub fn prime(&mut self) -> Result<()> {
        self.prev = Some(read_cpu_times()?);
        Ok(())
    }

    pub fn is_primed(&self) -> bool {
        self.prev.is_some()
    }

    /// Utilization since the previous reading, clamped to [0, 100] and rounded to 2 places
    pub fn collect(&mut self) -> Result<f64> {
        let current = read_cpu_times()?;
        let percent = match self.prev {
            Some(ref prev) => utilization(prev, &current),
            None => bail!("CPU counter read before it was primed"),
        };
        self.prev = Some(current);
        Ok((percent.clamp(0.0, 100.0) * 100.0).round() / 100.0)
    }
}

fn read_cpu_times() -> Result<CpuTimes> {
    let content = fs::read_to_string(PROC_STAT).context("Failed to read /proc/stat")?;
    parse_stat(&content)
}

/// Extract the aggregate `cpu` line from /proc/stat content.
pub fn parse_stat(content: &str) -> Result<CpuTimes> {
    let line = content
        .lines()
        .find(|line| line.starts_with("cpu "))
        .context("No aggregate cpu line in /proc/stat")?;
    parse_cpu_line(line)
}

fn parse_cpu_line(line: &str) -> Result<CpuTimes> {
    let parts: Vec<u64> = line
        .split_whitespace()
        .skip(1) // "cpu"
        .map(|s| s.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Malformed cpu line: {line}"))?;

    if parts.len() < 4 {
        bail!("Truncated cpu line: {line}");
    }

    Ok(CpuTimes {
        user: parts[0],
        nice: parts[1],
        system: parts[2],
        idle: parts[3],
        iowait: *parts.get(4).unwrap_or(&0),
        irq: *parts.get(5).unwrap_or(&0),
        softirq: *parts.get(6).unwrap_or(&0),
        steal: *parts.get(7).unwrap_or(&0),
    })
}

/// Busy share of the jiffies elapsed between two readings, in percent.
pub fn utilization(prev: &CpuTimes, curr: &CpuTimes) -> f64 {
    let total_delta = curr.total().saturating_sub(prev.total());
    if total_delta == 0 {
        return 0.0;
    }

    let idle_delta = curr.idle_total().saturating_sub(prev.idle_total());
    100.0 * (1.0 - (idle_delta as f64 / total_delta as f64))
}
