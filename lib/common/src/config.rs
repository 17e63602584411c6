//! Server configuration: defaults, an optional YAML file, environment overrides and
//! command-line overrides, applied in that order.

use config::{Config, Environment, File, FileFormat};
use getset::{CopyGetters, Getters, Setters};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Prefix of environment overrides, e.g. `HOSTMON__METRICS__IO=false`.
pub const ENV_PREFIX: &str = "HOSTMON";

/// File name looked up in the default configuration directories.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config {0} not found")]
    NotFound(PathBuf),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters, Setters, TypedBuilder,
)]
#[getset(get = "pub", set = "pub")]
#[serde(default)]
pub struct LoggerConfig {
    #[builder(default = "info".to_string())]
    level: String,
    /// Write logs to this file instead of stderr.
    #[builder(default)]
    file: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig::builder().build()
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters, Setters, TypedBuilder,
)]
#[getset(get = "pub", set = "pub")]
#[serde(default)]
pub struct ListenConfig {
    #[builder(default = DEFAULT_HOST.to_string())]
    host: String,
    #[builder(default = DEFAULT_PORT)]
    port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig::builder().build()
    }
}

impl ListenConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which metric kinds the server samples for its subscribers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, CopyGetters, Setters, TypedBuilder,
)]
#[getset(get_copy = "pub", set = "pub")]
#[serde(default)]
pub struct MetricsConfig {
    #[builder(default = true)]
    cpu: bool,
    #[builder(default = true)]
    load: bool,
    #[builder(default = true)]
    io: bool,
    #[builder(default = true)]
    disk_usage: bool,
    #[builder(default = true)]
    disk_inode: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig::builder().build()
    }
}

impl MetricsConfig {
    pub fn none() -> Self {
        MetricsConfig::builder()
            .cpu(false)
            .load(false)
            .io(false)
            .disk_usage(false)
            .disk_inode(false)
            .build()
    }
}

#[derive(
    Debug,
    Default,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Getters,
    Setters,
    TypedBuilder,
)]
#[getset(get = "pub", set = "pub")]
#[serde(default)]
pub struct ServerConfig {
    #[builder(default)]
    logger: LoggerConfig,
    #[builder(default)]
    listen: ListenConfig,
    #[builder(default)]
    metrics: MetricsConfig,
}

impl ServerConfig {
    /// Load the configuration.
    ///
    /// When `explicit` is given only that file is read and it must exist. Otherwise the
    /// first `config.yaml` found in `/etc/hostmon`, `$HOME/.hostmon`, `./configs` or
    /// the working directory is used, and running without any file is fine.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(explicit, &default_search_dirs(), ENV_PREFIX)
    }

    fn load_from(
        explicit: Option<&Path>,
        search_dirs: &[PathBuf],
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        let file = match explicit {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => search_dirs
                .iter()
                .map(|dir| dir.join(CONFIG_FILE_NAME))
                .find(|candidate| candidate.is_file()),
        };

        let mut builder = Config::builder();
        match &file {
            Some(path) => {
                info!(path = %path.display(), "Reading configuration file");
                builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Yaml));
            }
            None => debug!("No configuration file found, using defaults"),
        }

        let config = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<ServerConfig>()?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `--host` / `--port` style overrides on top of the loaded values.
    pub fn apply_overrides(&mut self, host: Option<String>, port: Option<u16>) {
        if let Some(host) = host {
            self.listen.host = host;
        }
        if let Some(port) = port {
            self.listen.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.host.trim().is_empty() {
            return Err(ConfigError::Invalid("listen.host must not be empty".to_string()));
        }
        if self.logger.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logger.level must not be empty".to_string()));
        }
        if self.logger.level.trim().parse::<LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "logger.level `{}` is not a log level",
                self.logger.level
            )));
        }
        Ok(())
    }
}

fn default_search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("/etc/hostmon")];
    if let Ok(home) = env::var("HOME") {
        dirs.push(Path::new(&home).join(".hostmon"));
    }
    dirs.push(PathBuf::from("./configs"));
    dirs.push(PathBuf::from("."));
    dirs
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    const NO_ENV: &str = "HOSTMON_TEST_UNUSED";

    #[test]
    fn defaults_without_any_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load_from(None, &[dir.path().to_path_buf()], NO_ENV).unwrap();

        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen().address(), "127.0.0.1:9080");
        assert!(config.metrics().cpu());
        assert!(config.metrics().disk_inode());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let mut temp_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
logger:
  level: debug
listen:
  host: 0.0.0.0
  port: 9999
metrics:
  io: false
  disk_inode: false
"#
        )
        .unwrap();

        let config = ServerConfig::load_from(Some(temp_file.path()), &[], NO_ENV).unwrap();

        assert_eq!(config.logger().level(), "debug");
        assert_eq!(config.listen().host(), "0.0.0.0");
        assert_eq!(*config.listen().port(), 9999);
        assert!(config.metrics().cpu());
        assert!(config.metrics().load());
        assert!(!config.metrics().io());
        assert!(config.metrics().disk_usage());
        assert!(!config.metrics().disk_inode());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = ServerConfig::load_from(
            Some(Path::new("/definitely/not/here/config.yaml")),
            &[],
            NO_ENV,
        );
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn first_file_in_search_path_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join(CONFIG_FILE_NAME), "listen:\n  port: 7001\n").unwrap();
        std::fs::write(second.path().join(CONFIG_FILE_NAME), "listen:\n  port: 7002\n").unwrap();

        let config = ServerConfig::load_from(
            None,
            &[first.path().to_path_buf(), second.path().to_path_buf()],
            NO_ENV,
        )
        .unwrap();

        assert_eq!(*config.listen().port(), 7001);
    }

    #[test]
    fn environment_overrides_file() {
        let prefix = "HOSTMON_TEST_ENV";
        env::set_var("HOSTMON_TEST_ENV__METRICS__LOAD", "false");
        env::set_var("HOSTMON_TEST_ENV__LISTEN__PORT", "9100");

        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load_from(None, &[dir.path().to_path_buf()], prefix).unwrap();

        env::remove_var("HOSTMON_TEST_ENV__METRICS__LOAD");
        env::remove_var("HOSTMON_TEST_ENV__LISTEN__PORT");

        assert!(!config.metrics().load());
        assert_eq!(*config.listen().port(), 9100);
    }

    #[test]
    fn command_line_overrides_win() {
        let mut config = ServerConfig::default();
        config.apply_overrides(Some("10.0.0.1".to_string()), None);
        assert_eq!(config.listen().address(), "10.0.0.1:9080");

        config.apply_overrides(None, Some(1234));
        assert_eq!(config.listen().address(), "10.0.0.1:1234");
    }

    #[test]
    fn empty_host_is_rejected() {
        let mut config = ServerConfig::default();
        config.apply_overrides(Some("  ".to_string()), None);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let mut config = ServerConfig::default();
        config.set_logger(LoggerConfig::builder().level("bogus".to_string()).build());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.set_logger(LoggerConfig::builder().level("WARN".to_string()).build());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn metric_flags_have_copy_getters_and_setters() {
        let mut metrics = MetricsConfig::none();
        assert!(!metrics.cpu());
        assert!(!metrics.disk_usage());

        metrics.set_cpu(true).set_disk_usage(true);
        assert!(metrics.cpu());
        assert!(!metrics.load());
        assert!(!metrics.io());
        assert!(metrics.disk_usage());
        assert!(!metrics.disk_inode());
    }
}
