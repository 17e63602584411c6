pub mod aggregate;
pub mod collector;
pub mod engine;
pub mod metric;
pub mod window;

pub use collector::{CollectError, CollectorFactory, MetricCollector, SystemCollectors};
pub use engine::{AggregationEngine, WindowSettings};
pub use metric::{Metric, MetricKind};
