use super::time::elapsed_subsec;
use crate::config::LoggerConfig;
use anyhow::{Context, Result};
use indicatif::ProgressStyle;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::{instrument, Subscriber};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Build the filter for the given level. `RUST_LOG` wins when it is set, but the
/// configured level must still be a valid one.
pub fn level_filter(level: &str) -> Result<EnvFilter> {
    let level: LevelFilter = level
        .trim()
        .parse()
        .with_context(|| format!("Invalid log level `{}`", level))?;

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    Ok(EnvFilter::default().add_directive(level.into()))
}

fn progress_layer<S>() -> Result<IndicatifLayer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let style = ProgressStyle::with_template(
        "{span_child_prefix}{span_fields} -- {span_name} {wide_msg} {elapsed_subsec}",
    )
    .context("Invalid progress template")?
    .with_key("elapsed_subsec", elapsed_subsec);

    Ok(IndicatifLayer::new()
        .with_progress_style(style)
        .with_span_child_prefix_symbol("↳ ")
        .with_span_child_prefix_indent(" "))
}

/// Install the global subscriber.
///
/// Logs go to stderr, or to `logger.file` when one is configured. With `progress`
/// set, long-running spans are also drawn as progress lines (used by the server;
/// the client keeps the terminal for its tables) and stderr output goes through the
/// progress bars' writer so the two don't overwrite each other.
#[instrument(skip(logger))]
pub fn initialize_tracing(logger: &LoggerConfig, progress: bool) -> Result<()> {
    let filter = level_filter(logger.level())?;
    let indicatif_layer = if progress { Some(progress_layer()?) } else { None };

    let fmt_layer = match (logger.file(), &indicatif_layer) {
        (Some(path), _) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .boxed()
        }
        (None, Some(indicatif)) => fmt::layer()
            .with_writer(indicatif.get_stderr_writer())
            .boxed(),
        (None, None) => fmt::layer().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(indicatif_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
