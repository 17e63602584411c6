use super::{CollectError, MetricCollector};
use crate::metric::{LoadSample, Metric, MetricKind};
use async_trait::async_trait;
use sysinfo::System;
use tracing::trace;

/// System load averages as reported by the kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadCollector;

#[async_trait]
impl MetricCollector for LoadCollector {
    type Sample = LoadSample;

    fn name(&self) -> &'static str {
        "load"
    }

    fn kind(&self) -> MetricKind {
        MetricKind::Load
    }

    async fn collect(&mut self) -> Result<LoadSample, CollectError> {
        let load = System::load_average();
        trace!(one = load.one, five = load.five, fifteen = load.fifteen, "Sampled load");

        Ok(LoadSample {
            load1: load.one as f32,
            load5: load.five as f32,
            load15: load.fifteen as f32,
        })
    }

    fn snapshot(&self, average: LoadSample) -> Metric {
        Metric::Load(average)
    }
}

#[cfg(test)]
mod load_tests {
    use super::*;

    #[tokio::test]
    async fn load_is_never_negative() {
        let sample = LoadCollector.collect().await.unwrap();
        assert!(sample.load1 >= 0.0);
        assert!(sample.load5 >= 0.0);
        assert!(sample.load15 >= 0.0);
        assert!(matches!(LoadCollector.snapshot(sample), Metric::Load(_)));
    }
}
