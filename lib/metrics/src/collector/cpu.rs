use super::{read_source, CollectError, MetricCollector};
use crate::metric::{CpuSample, CpuStat, Metric, MetricKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{instrument, trace};
use typed_builder::TypedBuilder;

pub const PROC_STAT: &str = "/proc/stat";

/// Cumulative jiffies of one `cpu` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CpuTimes {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl CpuTimes {
    fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Percentages over the delta since `prev`.
    pub(crate) fn usage_since(&self, cpu: String, prev: &CpuTimes) -> CpuStat {
        let total = self.total().saturating_sub(prev.total());
        if total == 0 {
            return CpuStat {
                cpu,
                user: 0.0,
                system: 0.0,
                idle: 0.0,
            };
        }

        let delta = |now: u64, before: u64| now.saturating_sub(before);
        let percent = |ticks: u64| (ticks as f64 / total as f64 * 100.0) as f32;

        CpuStat {
            cpu,
            user: percent(delta(self.user, prev.user) + delta(self.nice, prev.nice)),
            system: percent(
                delta(self.system, prev.system)
                    + delta(self.irq, prev.irq)
                    + delta(self.softirq, prev.softirq),
            ),
            idle: percent(delta(self.idle, prev.idle) + delta(self.iowait, prev.iowait)),
        }
    }
}

/// Parse the `cpu*` lines of `/proc/stat`. The aggregate line is keyed `all`, cores
/// by their index.
pub(crate) fn parse_proc_stat(content: &str) -> Result<Vec<(String, CpuTimes)>, CollectError> {
    let mut cpus = Vec::new();

    for line in content.lines().filter(|line| line.starts_with("cpu")) {
        let mut fields = line.split_whitespace();
        let label = fields.next().unwrap_or_default();
        let id = match label.strip_prefix("cpu") {
            Some("") => "all".to_string(),
            Some(index) if index.bytes().all(|b| b.is_ascii_digit()) => index.to_string(),
            _ => continue,
        };

        let values = fields
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CollectError::parse("/proc/stat", format!("{label}: {err}")))?;
        if values.len() < 4 {
            return Err(CollectError::parse(
                "/proc/stat",
                format!("{label}: expected at least 4 counters, found {}", values.len()),
            ));
        }
        let at = |i: usize| values.get(i).copied().unwrap_or(0);

        cpus.push((
            id,
            CpuTimes {
                user: at(0),
                nice: at(1),
                system: at(2),
                idle: at(3),
                iowait: at(4),
                irq: at(5),
                softirq: at(6),
                steal: at(7),
            },
        ));
    }

    if cpus.is_empty() {
        return Err(CollectError::parse("/proc/stat", "no cpu lines"));
    }
    Ok(cpus)
}

/// Per-CPU utilisation from `/proc/stat` counter deltas.
///
/// The first reading has no previous counters and is therefore relative to boot.
#[derive(Debug, TypedBuilder)]
pub struct CpuCollector {
    #[builder(default = PathBuf::from(PROC_STAT), setter(into))]
    source: PathBuf,
    #[builder(default, setter(skip))]
    previous: HashMap<String, CpuTimes>,
}

impl CpuCollector {
    pub fn new() -> Self {
        CpuCollector::builder().build()
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricCollector for CpuCollector {
    type Sample = CpuSample;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Cpu
    }

    #[instrument(skip(self), fields(source = %self.source.display()))]
    async fn collect(&mut self) -> Result<CpuSample, CollectError> {
        let content = read_source(&self.source).await?;
        let current = parse_proc_stat(&content)?;

        let cpus = current
            .iter()
            .map(|(id, times)| {
                let prev = self.previous.get(id).copied().unwrap_or_default();
                times.usage_since(id.clone(), &prev)
            })
            .collect::<Vec<_>>();

        trace!(cpus = cpus.len(), "Sampled CPU usage");
        self.previous = current.into_iter().collect();
        Ok(CpuSample { cpus })
    }

    fn snapshot(&self, average: CpuSample) -> Metric {
        Metric::Cpu(average)
    }
}

#[cfg(test)]
mod cpu_tests {
    use super::*;
    use std::io::Write;

    const FIRST: &str = "\
cpu  100 0 50 850 0 0 0 0 0 0
cpu0 60 0 20 420 0 0 0 0 0 0
cpu1 40 0 30 430 0 0 0 0 0 0
intr 12345 0 0
ctxt 6789
";

    const SECOND: &str = "\
cpu  160 0 70 970 0 0 0 0 0 0
cpu0 110 0 30 460 0 0 0 0 0 0
cpu1 50 0 40 510 0 0 0 0 0 0
intr 12350 0 0
";

    #[test]
    fn parses_aggregate_and_cores() {
        let cpus = parse_proc_stat(FIRST).unwrap();
        let ids: Vec<&str> = cpus.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["all", "0", "1"]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_proc_stat("intr 1 2 3\n").is_err());
        assert!(parse_proc_stat("cpu 1 2 x 4\n").is_err());
        assert!(parse_proc_stat("cpu 1 2\n").is_err());
    }

    #[test]
    fn usage_over_delta() {
        let first = parse_proc_stat(FIRST).unwrap();
        let second = parse_proc_stat(SECOND).unwrap();

        // cpu0: +50 user, +10 system, +40 idle over 100 jiffies
        let stat = second[1].1.usage_since("0".to_string(), &first[1].1);
        assert_eq!(stat.user, 50.0);
        assert_eq!(stat.system, 10.0);
        assert_eq!(stat.idle, 40.0);
    }

    #[test]
    fn no_progress_reports_zero() {
        let first = parse_proc_stat(FIRST).unwrap();
        let stat = first[0].1.usage_since("all".to_string(), &first[0].1);
        assert_eq!((stat.user, stat.system, stat.idle), (0.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn collector_tracks_previous_reading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FIRST.as_bytes()).unwrap();
        let mut collector = CpuCollector::builder().source(file.path()).build();

        let boot = collector.collect().await.unwrap();
        assert_eq!(boot.cpus[0].cpu, "all");
        assert_eq!(boot.cpus[0].idle, 85.0);

        std::fs::write(file.path(), SECOND).unwrap();
        let sample = collector.collect().await.unwrap();
        assert_eq!(sample.cpus.len(), 3);
        assert_eq!(sample.cpus[2].cpu, "1");
        assert_eq!(sample.cpus[2].user, 10.0);
        assert_eq!(sample.cpus[2].idle, 80.0);
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let mut collector = CpuCollector::builder().source("/no/such/proc/stat").build();
        assert!(matches!(
            collector.collect().await,
            Err(CollectError::Read { .. })
        ));
    }
}
