use common::traits::encode::{decode_json, encode_json, Decodable, Encodable, EncodingError};
use core::fmt;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The metric kinds the agent can sample and stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Cpu,
    Load,
    Io,
    DiskUsage,
    DiskInode,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Cpu,
        MetricKind::Load,
        MetricKind::Io,
        MetricKind::DiskUsage,
        MetricKind::DiskInode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Load => "load",
            MetricKind::Io => "io",
            MetricKind::DiskUsage => "disk_usage",
            MetricKind::DiskInode => "disk_inode",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aggregate snapshot as it travels to subscribers.
/// Exactly one metric kind is carried per value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Metric {
    Cpu(CpuSample),
    Load(LoadSample),
    Io(IoSample),
    DiskUsage(DiskSample),
    DiskInode(DiskSample),
}

/// Utilisation of one logical CPU, or of all of them under the id `all`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStat {
    pub cpu: String,
    /// Percentage of time spent in user mode.
    pub user: f32,
    /// Percentage of time spent in kernel mode.
    pub system: f32,
    /// Percentage of idle time.
    pub idle: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    pub cpus: Vec<CpuStat>,
}

/// System load averages over 1, 5 and 15 minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    pub load1: f32,
    pub load5: f32,
    pub load15: f32,
}

/// Throughput and utilisation of one block device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoStat {
    pub device: String,
    pub read_kbs: f32,
    pub write_kbs: f32,
    /// Percentage of elapsed time the device had I/O in flight.
    pub util: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoSample {
    pub disks: Vec<IoStat>,
}

/// Used and available capacity of one mounted filesystem. Depending on the metric
/// kind the unit is bytes (disk usage) or inodes (disk inode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStat {
    pub device: String,
    pub fs_type: String,
    pub mount: String,
    pub used: i64,
    pub available: i64,
}

impl DiskStat {
    pub fn total(&self) -> i64 {
        self.used.saturating_add(self.available)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSample {
    pub mounts: Vec<DiskStat>,
}

impl Metric {
    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Cpu(_) => MetricKind::Cpu,
            Metric::Load(_) => MetricKind::Load,
            Metric::Io(_) => MetricKind::Io,
            Metric::DiskUsage(_) => MetricKind::DiskUsage,
            Metric::DiskInode(_) => MetricKind::DiskInode,
        }
    }

    /// Log every group of the snapshot at debug level.
    pub fn log_metric(&self) {
        match self {
            Metric::Cpu(data) => {
                for stat in &data.cpus {
                    debug!(
                        "CPU {}: user {:.2}%, system {:.2}%, idle {:.2}%",
                        stat.cpu, stat.user, stat.system, stat.idle
                    )
                }
            }
            Metric::Load(data) => debug!(
                "Load Average: {:.2} {:.2} {:.2}",
                data.load1, data.load5, data.load15
            ),
            Metric::Io(data) => {
                for stat in &data.disks {
                    debug!(
                        "Disk I/O {}: read {:.2} kB/s, write {:.2} kB/s, util {:.2}%",
                        stat.device, stat.read_kbs, stat.write_kbs, stat.util
                    )
                }
            }
            Metric::DiskUsage(data) => {
                for stat in &data.mounts {
                    debug!(
                        "Disk Usage {} ({}): used {} bytes, available {} bytes",
                        stat.mount, stat.device, stat.used, stat.available
                    )
                }
            }
            Metric::DiskInode(data) => {
                for stat in &data.mounts {
                    debug!(
                        "Disk Inodes {} ({}): used {}, available {}",
                        stat.mount, stat.device, stat.used, stat.available
                    )
                }
            }
        }
    }
}

impl Encodable for Metric {
    fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        encode_json(self)
    }
}

impl Decodable for Metric {
    fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        decode_json(bytes)
    }
}
