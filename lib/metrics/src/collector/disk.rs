use super::{CollectError, MetricCollector};
use crate::metric::{DiskSample, DiskStat, Metric, MetricKind};
use async_trait::async_trait;
use sysinfo::Disks;
use tokio::process::Command;
use tracing::{debug, instrument, trace};

/// Used and available bytes of every mounted filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskUsageCollector;

#[async_trait]
impl MetricCollector for DiskUsageCollector {
    type Sample = DiskSample;

    fn name(&self) -> &'static str {
        "disk_usage"
    }

    fn kind(&self) -> MetricKind {
        MetricKind::DiskUsage
    }

    #[instrument(skip(self))]
    async fn collect(&mut self) -> Result<DiskSample, CollectError> {
        let mounts = tokio::task::spawn_blocking(|| {
            let disks = Disks::new_with_refreshed_list();
            disks
                .list()
                .iter()
                .map(|disk| {
                    let total = disk.total_space();
                    let available = disk.available_space().min(total);
                    DiskStat {
                        device: disk.name().to_string_lossy().into_owned(),
                        fs_type: disk.file_system().to_string_lossy().into_owned(),
                        mount: disk.mount_point().to_string_lossy().into_owned(),
                        used: i64::try_from(total - available).unwrap_or(i64::MAX),
                        available: i64::try_from(available).unwrap_or(i64::MAX),
                    }
                })
                .collect::<Vec<_>>()
        })
        .await?;

        trace!(mounts = mounts.len(), "Sampled disk usage");
        Ok(DiskSample { mounts })
    }

    fn snapshot(&self, average: DiskSample) -> Metric {
        Metric::DiskUsage(average)
    }
}

/// Parse the output of `df -PTi`:
/// `Filesystem Type Inodes IUsed IFree IUse% Mounted on`.
///
/// Filesystems without inode accounting (`-` in the counters) are skipped. A mount
/// path containing spaces spans the remaining fields.
pub(crate) fn parse_df_inodes(output: &str) -> Result<Vec<DiskStat>, CollectError> {
    let mut mounts = Vec::new();

    for line in output.lines().skip(1).filter(|line| !line.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            return Err(CollectError::parse(
                "df output",
                format!("expected 7 fields, found {}: {line}", fields.len()),
            ));
        }
        if fields[3] == "-" || fields[4] == "-" {
            debug!(mount = fields[6], "Skipping filesystem without inode accounting");
            continue;
        }

        let count = |i: usize| {
            fields[i]
                .parse::<i64>()
                .map_err(|err| CollectError::parse("df output", format!("{}: {err}", fields[i])))
        };

        mounts.push(DiskStat {
            device: fields[0].to_string(),
            fs_type: fields[1].to_string(),
            used: count(3)?,
            available: count(4)?,
            mount: fields[6..].join(" "),
        });
    }

    Ok(mounts)
}

/// Used and free inodes of every mounted filesystem, via `df`.
#[derive(Debug, Clone)]
pub struct DiskInodeCollector {
    program: String,
}

impl DiskInodeCollector {
    pub fn new() -> Self {
        Self {
            program: "df".to_string(),
        }
    }
}

impl Default for DiskInodeCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricCollector for DiskInodeCollector {
    type Sample = DiskSample;

    fn name(&self) -> &'static str {
        "disk_inode"
    }

    fn kind(&self) -> MetricKind {
        MetricKind::DiskInode
    }

    #[instrument(skip(self))]
    async fn collect(&mut self) -> Result<DiskSample, CollectError> {
        let command = format!("{} -PTi", self.program);
        let output = Command::new(&self.program)
            .arg("-PTi")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| CollectError::Command {
                command: command.clone(),
                reason: err.to_string(),
            })?;

        // df exits non-zero when a single mount is unreadable but still prints the rest
        if !output.status.success() && output.stdout.is_empty() {
            return Err(CollectError::Command {
                command,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mounts = parse_df_inodes(&String::from_utf8_lossy(&output.stdout))?;
        trace!(mounts = mounts.len(), "Sampled disk inodes");
        Ok(DiskSample { mounts })
    }

    fn snapshot(&self, average: DiskSample) -> Metric {
        Metric::DiskInode(average)
    }
}
