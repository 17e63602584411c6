use super::SharedWriter;
use crate::protocol::message::Message;
use crate::protocol::Protocol;
use common::MetricsConfig;
use core::fmt;
use getset::{CopyGetters, Getters};
use metrics::engine::{AggregationEngine, WindowSettings, DEFAULT_TICK};
use metrics::{CollectorFactory, Metric, MetricCollector, MetricKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};
use typed_builder::TypedBuilder;

/// Starts one engine and one forwarder per enabled metric kind for every session.
#[derive(Clone, Getters, CopyGetters, TypedBuilder)]
pub struct SessionDispatcher {
    #[getset(get_copy = "pub")]
    metrics: MetricsConfig,
    #[getset(get = "pub")]
    factory: Arc<dyn CollectorFactory>,
    #[getset(get_copy = "pub")]
    #[builder(default = DEFAULT_TICK)]
    tick: Duration,
}

impl fmt::Debug for SessionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDispatcher")
            .field("metrics", &self.metrics)
            .field("tick", &self.tick)
            .finish()
    }
}

impl SessionDispatcher {
    pub fn new(metrics: MetricsConfig, factory: Arc<dyn CollectorFactory>) -> Self {
        SessionDispatcher::builder()
            .metrics(metrics)
            .factory(factory)
            .build()
    }

    pub fn enabled_kinds(&self) -> Vec<MetricKind> {
        MetricKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                MetricKind::Cpu => self.metrics.cpu(),
                MetricKind::Load => self.metrics.load(),
                MetricKind::Io => self.metrics.io(),
                MetricKind::DiskUsage => self.metrics.disk_usage(),
                MetricKind::DiskInode => self.metrics.disk_inode(),
            })
            .collect()
    }

    /// Window shape for a subscription, sampled at this dispatcher's tick.
    pub fn settings(&self, interval: u32, counter: u32) -> WindowSettings {
        WindowSettings::builder()
            .interval(interval)
            .counter(counter)
            .tick(self.tick)
            .build()
            .normalized()
    }

    /// Run a session until `cancel` fires. Returns once every task of the session
    /// has finished.
    #[instrument(skip_all, fields(interval = settings.interval(), counter = settings.counter()))]
    pub async fn dispatch<W>(
        &self,
        settings: WindowSettings,
        writer: SharedWriter<W>,
        cancel: CancellationToken,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut tasks = JoinSet::new();

        for kind in self.enabled_kinds() {
            match kind {
                MetricKind::Cpu => {
                    spawn_pipeline(&mut tasks, self.factory.cpu(), settings, &writer, &cancel)
                }
                MetricKind::Load => {
                    spawn_pipeline(&mut tasks, self.factory.load(), settings, &writer, &cancel)
                }
                MetricKind::Io => {
                    spawn_pipeline(&mut tasks, self.factory.io(), settings, &writer, &cancel)
                }
                MetricKind::DiskUsage => spawn_pipeline(
                    &mut tasks,
                    self.factory.disk_usage(),
                    settings,
                    &writer,
                    &cancel,
                ),
                MetricKind::DiskInode => spawn_pipeline(
                    &mut tasks,
                    self.factory.disk_inode(),
                    settings,
                    &writer,
                    &cancel,
                ),
            }
        }

        debug!(tasks = tasks.len(), "Session dispatched");

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Session task failed, cancelling session");
                cancel.cancel();
            }
        }

        debug!("All session tasks finished");
    }
}

fn spawn_pipeline<C, W>(
    tasks: &mut JoinSet<()>,
    collector: C,
    settings: WindowSettings,
    writer: &SharedWriter<W>,
    cancel: &CancellationToken,
) where
    C: MetricCollector + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let kind = collector.kind();
    let (tx, rx) = mpsc::channel(1);

    tasks.spawn(AggregationEngine::new(collector, settings).run(tx, cancel.clone()));
    tasks.spawn(forward(kind, rx, writer.clone(), cancel.clone()));
}

/// Move snapshots of one kind from its engine onto the shared connection. A failed
/// write ends the whole session.
async fn forward<W>(
    kind: MetricKind,
    mut rx: mpsc::Receiver<Metric>,
    writer: SharedWriter<W>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let metric = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(metric) => metric,
                None => break,
            },
        };

        metric.log_metric();
        let message = Message::metrics(metric);
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            written = async {
                let mut stream = writer.lock().await;
                Protocol::send_message(&mut *stream, &message).await
            } => written,
        };

        match written {
            Ok(()) => trace!(%kind, "Snapshot forwarded"),
            Err(err) => {
                warn!(%kind, error = %err, "Failed to write snapshot, closing session");
                cancel.cancel();
                break;
            }
        }
    }
}
