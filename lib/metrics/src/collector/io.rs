use super::{read_source, CollectError, MetricCollector};
use crate::metric::{IoSample, IoStat, Metric, MetricKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{instrument, trace};
use typed_builder::TypedBuilder;

pub const PROC_DISKSTATS: &str = "/proc/diskstats";
pub const PROC_UPTIME: &str = "/proc/uptime";

const SECTOR_SIZE: f64 = 512.0;

/// Cumulative counters of one `/proc/diskstats` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DiskCounters {
    sectors_read: u64,
    sectors_written: u64,
    /// Milliseconds spent with I/O in flight.
    io_ticks: u64,
}

impl DiskCounters {
    pub(crate) fn rates_since(&self, device: String, prev: &DiskCounters, elapsed: Duration) -> IoStat {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return IoStat {
                device,
                read_kbs: 0.0,
                write_kbs: 0.0,
                util: 0.0,
            };
        }

        let kb = |now: u64, before: u64| now.saturating_sub(before) as f64 * SECTOR_SIZE / 1024.0;
        let busy_ms = self.io_ticks.saturating_sub(prev.io_ticks) as f64;

        IoStat {
            device,
            read_kbs: (kb(self.sectors_read, prev.sectors_read) / secs) as f32,
            write_kbs: (kb(self.sectors_written, prev.sectors_written) / secs) as f32,
            util: (busy_ms / (secs * 1000.0) * 100.0).min(100.0) as f32,
        }
    }
}

/// Parse `/proc/diskstats`, skipping loop and ram devices.
pub(crate) fn parse_diskstats(content: &str) -> Result<Vec<(String, DiskCounters)>, CollectError> {
    let mut disks = Vec::new();

    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 14 {
            return Err(CollectError::parse(
                "/proc/diskstats",
                format!("expected at least 14 fields, found {}", fields.len()),
            ));
        }

        let device = fields[2];
        if device.starts_with("loop") || device.starts_with("ram") {
            continue;
        }

        let field = |i: usize| {
            fields[i].parse::<u64>().map_err(|err| {
                CollectError::parse("/proc/diskstats", format!("{device} field {i}: {err}"))
            })
        };

        disks.push((
            device.to_string(),
            DiskCounters {
                sectors_read: field(5)?,
                sectors_written: field(9)?,
                io_ticks: field(12)?,
            },
        ));
    }

    Ok(disks)
}

/// Seconds since boot, the first field of `/proc/uptime`.
pub(crate) fn parse_uptime(content: &str) -> Result<Duration, CollectError> {
    let seconds = content
        .split_whitespace()
        .next()
        .ok_or_else(|| CollectError::parse("/proc/uptime", "empty"))?
        .parse::<f64>()
        .map_err(|err| CollectError::parse("/proc/uptime", err.to_string()))?;

    Duration::try_from_secs_f64(seconds)
        .map_err(|err| CollectError::parse("/proc/uptime", err.to_string()))
}

/// Per-device throughput and utilisation from `/proc/diskstats` deltas.
///
/// The first reading is averaged over the whole uptime.
#[derive(Debug, TypedBuilder)]
pub struct IoCollector {
    #[builder(default = PathBuf::from(PROC_DISKSTATS), setter(into))]
    source: PathBuf,
    #[builder(default = PathBuf::from(PROC_UPTIME), setter(into))]
    uptime: PathBuf,
    #[builder(default, setter(skip))]
    previous: HashMap<String, DiskCounters>,
    #[builder(default, setter(skip))]
    last_read: Option<Instant>,
}

impl IoCollector {
    pub fn new() -> Self {
        IoCollector::builder().build()
    }

    async fn elapsed(&self, now: Instant) -> Result<Duration, CollectError> {
        match self.last_read {
            Some(last) => Ok(now.duration_since(last)),
            None => parse_uptime(&read_source(&self.uptime).await?),
        }
    }
}

impl Default for IoCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricCollector for IoCollector {
    type Sample = IoSample;

    fn name(&self) -> &'static str {
        "io"
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Io
    }

    #[instrument(skip(self), fields(source = %self.source.display()))]
    async fn collect(&mut self) -> Result<IoSample, CollectError> {
        let now = Instant::now();
        let content = read_source(&self.source).await?;
        let current = parse_diskstats(&content)?;
        let elapsed = self.elapsed(now).await?;

        let disks = current
            .iter()
            .map(|(device, counters)| {
                let prev = self.previous.get(device).copied().unwrap_or_default();
                counters.rates_since(device.clone(), &prev, elapsed)
            })
            .collect::<Vec<_>>();

        trace!(devices = disks.len(), "Sampled disk I/O");
        self.previous = current.into_iter().collect();
        self.last_read = Some(now);
        Ok(IoSample { disks })
    }

    fn snapshot(&self, average: IoSample) -> Metric {
        Metric::Io(average)
    }
}
