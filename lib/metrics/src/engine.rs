//! Per-kind aggregation engine.
//!
//! Each engine owns one collector and one [`BoundedWindow`]. Once per tick it takes a
//! sample, slides the window and, on the emission cadence, sends the average of the
//! window downstream. Every blocking step races the session's cancellation token.

use crate::aggregate::Aggregate;
use crate::collector::MetricCollector;
use crate::metric::Metric;
use crate::window::BoundedWindow;
use getset::CopyGetters;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

/// Sampling period of every engine.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Window shape negotiated by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters, TypedBuilder)]
#[getset(get_copy = "pub")]
pub struct WindowSettings {
    /// Emit every `interval` accepted samples.
    interval: u32,
    /// Window capacity in samples.
    counter: u32,
    #[builder(default = DEFAULT_TICK)]
    tick: Duration,
}

impl WindowSettings {
    /// Zero intervals and zero-sized windows are bumped to one.
    pub fn normalized(self) -> Self {
        Self {
            interval: self.interval.max(1),
            counter: self.counter.max(1),
            tick: self.tick,
        }
    }
}

/// Window bookkeeping and the emission cadence, independent of any I/O.
#[derive(Debug)]
pub struct Aggregator<S> {
    window: BoundedWindow<S>,
    counter: usize,
    interval: usize,
    iter: usize,
}

impl<S: Aggregate> Aggregator<S> {
    pub fn new(settings: WindowSettings) -> Self {
        let settings = settings.normalized();
        let counter = settings.counter as usize;
        Self {
            window: BoundedWindow::with_capacity(counter),
            counter,
            interval: settings.interval as usize,
            iter: 0,
        }
    }

    pub fn window(&self) -> &BoundedWindow<S> {
        &self.window
    }

    /// Admit one sample. Returns the window average when this sample completes an
    /// emission period.
    pub fn admit(&mut self, sample: S) -> Option<S> {
        if self.window.len() >= self.counter {
            self.window.remove_back();
        }
        self.window.push_front(sample);

        if self.window.len() < self.counter.saturating_sub(self.interval) {
            return None;
        }

        if self.iter + 1 == self.interval {
            self.iter = 0;
            Some(S::average(self.window.iter()))
        } else {
            self.iter += 1;
            None
        }
    }
}

pub struct AggregationEngine<C: MetricCollector> {
    collector: C,
    aggregator: Aggregator<C::Sample>,
    tick: Duration,
}

impl<C> AggregationEngine<C>
where
    C: MetricCollector,
{
    pub fn new(collector: C, settings: WindowSettings) -> Self {
        Self {
            collector,
            aggregator: Aggregator::new(settings),
            tick: settings.tick(),
        }
    }

    /// Run until `cancel` fires or the receiving side goes away.
    ///
    /// A failed sample is logged and the tick skipped; the window is left untouched.
    pub async fn run(mut self, tx: mpsc::Sender<Metric>, cancel: CancellationToken) {
        let name = self.collector.name();
        debug!(collector = name, tick = ?self.tick, "Starting aggregation engine");

        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sample = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.collector.collect() => result,
            };

            let sample = match sample {
                Ok(sample) => sample,
                Err(err) => {
                    warn!(collector = name, error = %err, "Sampling failed, skipping tick");
                    continue;
                }
            };

            let Some(average) = self.aggregator.admit(sample) else {
                trace!(collector = name, len = self.aggregator.window().len(), "Sample admitted");
                continue;
            };

            let metric = self.collector.snapshot(average);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = tx.send(metric) => {
                    if sent.is_err() {
                        debug!(collector = name, "Snapshot receiver closed");
                        break;
                    }
                }
            }
        }

        debug!(collector = name, "Aggregation engine stopped");
    }
}
