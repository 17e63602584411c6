pub mod config;
pub mod traits;
pub mod util;

pub use config::{ConfigError, ListenConfig, LoggerConfig, MetricsConfig, ServerConfig};

/// Default address the server listens on and the client dials.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default TCP port of the streaming service.
pub const DEFAULT_PORT: u16 = 9080;

/// Default emission period, in accepted samples.
pub const DEFAULT_INTERVAL: u32 = 5;

/// Default window capacity, in samples.
pub const DEFAULT_COUNTER: u32 = 15;
