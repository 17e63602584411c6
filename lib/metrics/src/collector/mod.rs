use crate::aggregate::Aggregate;
use crate::metric::{CpuSample, DiskSample, IoSample, LoadSample, Metric, MetricKind};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub mod cpu;
pub mod disk;
pub mod io;
pub mod load;

pub use cpu::CpuCollector;
pub use disk::{DiskInodeCollector, DiskUsageCollector};
pub use io::IoCollector;
pub use load::LoadCollector;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Sampling task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CollectError {
    pub(crate) fn parse(what: &'static str, reason: impl Into<String>) -> Self {
        CollectError::Parse {
            what,
            reason: reason.into(),
        }
    }
}

/// A sampler for one metric kind.
///
/// `collect` is called once per tick by the owning engine and may keep state between
/// calls (e.g. previous counters for delta-based kinds). Failures are returned, the
/// engine decides what to do with them.
#[async_trait]
pub trait MetricCollector: Send {
    type Sample: Aggregate + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    fn kind(&self) -> MetricKind;

    async fn collect(&mut self) -> Result<Self::Sample, CollectError>;

    /// Wrap an averaged sample into the snapshot sent to subscribers.
    fn snapshot(&self, average: Self::Sample) -> Metric;
}

pub type BoxedCollector<S> = Box<dyn MetricCollector<Sample = S>>;

#[async_trait]
impl<S> MetricCollector for BoxedCollector<S>
where
    S: Aggregate + Send + Sync + 'static,
{
    type Sample = S;

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn kind(&self) -> MetricKind {
        (**self).kind()
    }

    async fn collect(&mut self) -> Result<S, CollectError> {
        (**self).collect().await
    }

    fn snapshot(&self, average: S) -> Metric {
        (**self).snapshot(average)
    }
}

/// Builds a fresh set of collectors for every session, so per-session delta state
/// is never shared.
pub trait CollectorFactory: Send + Sync + 'static {
    fn cpu(&self) -> BoxedCollector<CpuSample>;
    fn load(&self) -> BoxedCollector<LoadSample>;
    fn io(&self) -> BoxedCollector<IoSample>;
    fn disk_usage(&self) -> BoxedCollector<DiskSample>;
    fn disk_inode(&self) -> BoxedCollector<DiskSample>;
}

/// Collectors reading the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCollectors;

impl CollectorFactory for SystemCollectors {
    fn cpu(&self) -> BoxedCollector<CpuSample> {
        Box::new(CpuCollector::new())
    }

    fn load(&self) -> BoxedCollector<LoadSample> {
        Box::new(LoadCollector)
    }

    fn io(&self) -> BoxedCollector<IoSample> {
        Box::new(IoCollector::new())
    }

    fn disk_usage(&self) -> BoxedCollector<DiskSample> {
        Box::new(DiskUsageCollector)
    }

    fn disk_inode(&self) -> BoxedCollector<DiskSample> {
        Box::new(DiskInodeCollector::new())
    }
}

/// Read a whole procfs-style file.
pub(crate) async fn read_source(path: &std::path::Path) -> Result<String, CollectError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CollectError::Read {
            path: path.to_path_buf(),
            source,
        })
}
