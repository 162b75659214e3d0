//! Immutable resource-utilization snapshot and the views derived from it.
//!
//! A [`Snapshot`] is produced once per collection tick and shared read-only
//! with every sink. The log line, console summary and wire payload are all
//! computed from it on demand; nothing derived is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Used/total pair for a sized resource (RAM or a filesystem), in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl Usage {
    pub fn new(used_bytes: u64, total_bytes: u64) -> Self {
        Self {
            used_bytes,
            total_bytes,
        }
    }

    pub fn used_mb(&self) -> f64 {
        self.used_bytes as f64 / BYTES_PER_MB
    }

    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / BYTES_PER_MB
    }

    /// Used share in percent; zero when the total is unknown.
    pub fn percent(&self) -> f64 {
        if self.total_bytes > 0 {
            self.used_bytes as f64 * 100.0 / self.total_bytes as f64
        } else {
            0.0
        }
    }
}

/// One measurement of host CPU, memory and disk utilization
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    cpu_percent: f64,
    ram: Usage,
    disk: Usage,
    captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot stamped with the current UTC time.
    pub fn new(cpu_percent: f64, ram: Usage, disk: Usage) -> Self {
        Self::captured_at(Utc::now(), cpu_percent, ram, disk)
    }

    /// Build a snapshot with an explicit capture time.
    ///
    /// CPU utilization is clamped into `[0, 100]`; a NaN reading becomes 0.
    pub fn captured_at(captured_at: DateTime<Utc>, cpu_percent: f64, ram: Usage, disk: Usage) -> Self {
        Self {
            cpu_percent: clamp_percent(cpu_percent),
            ram,
            disk,
            captured_at,
        }
    }

    pub fn cpu_percent(&self) -> f64 {
        self.cpu_percent
    }

    pub fn ram_used_bytes(&self) -> u64 {
        self.ram.used_bytes
    }

    pub fn ram_total_bytes(&self) -> u64 {
        self.ram.total_bytes
    }

    pub fn disk_used_bytes(&self) -> u64 {
        self.disk.used_bytes
    }

    pub fn disk_total_bytes(&self) -> u64 {
        self.disk.total_bytes
    }

    pub fn captured_at_utc(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn ram_used_mb(&self) -> f64 {
        self.ram.used_mb()
    }

    pub fn ram_total_mb(&self) -> f64 {
        self.ram.total_mb()
    }

    pub fn disk_used_mb(&self) -> f64 {
        self.disk.used_mb()
    }

    pub fn disk_total_mb(&self) -> f64 {
        self.disk.total_mb()
    }

    pub fn ram_percent(&self) -> f64 {
        self.ram.percent()
    }

    pub fn disk_percent(&self) -> f64 {
        self.disk.percent()
    }

    /// JSON body posted to the remote endpoint
    pub fn payload(&self) -> Payload {
        Payload {
            cpu: round2(self.cpu_percent),
            ram_used: round2(self.ram_used_mb()),
            ram_total: round2(self.ram_total_mb()),
            ram_percent: round2(self.ram_percent()),
            disk_used: round2(self.disk_used_mb()),
            disk_total: round2(self.disk_total_mb()),
            disk_percent: round2(self.disk_percent()),
            timestamp: self.captured_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }

    /// Line appended to the durable log for this snapshot
    pub fn log_line(&self) -> String {
        format!("[{}] {}", self.captured_at.format("%Y-%m-%d %H:%M:%S"), self)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CPU: {:.1}% | RAM: {:.1}MB/{:.1}MB ({:.1}%) | Disk: {:.1}MB/{:.1}MB ({:.1}%) | Time: {}",
            self.cpu_percent,
            self.ram_used_mb(),
            self.ram_total_mb(),
            self.ram_percent(),
            self.disk_used_mb(),
            self.disk_total_mb(),
            self.disk_percent(),
            self.captured_at.format("%H:%M:%S"),
        )
    }
}

/// Wire representation of a snapshot; sizes in MB, everything rounded to 2 places
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub cpu: f64,
    pub ram_used: f64,
    pub ram_total: f64,
    pub ram_percent: f64,
    pub disk_used: f64,
    pub disk_total: f64,
    pub disk_percent: f64,
    pub timestamp: String,
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
