//! Logging setup for the `chbridge` binary
//!
//! Pretty console output on stderr, plus a daily-rolling JSON file when a log
//! directory is configured. `RUST_LOG` takes precedence over the configured
//! level.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// The returned guard flushes the JSON file on drop and must be held until
/// the program exits.
pub fn init(level: &str, json_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers = Vec::new();

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .pretty()
        .with_filter(env_filter.clone())
        .boxed();
    layers.push(console_layer);

    let guard = match json_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "chbridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let json_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(writer)
                .with_filter(env_filter)
                .boxed();
            layers.push(json_layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry().with(layers).init();

    tracing::debug!(
        json_dir = ?json_dir.map(Path::display),
        "logging initialized"
    );
    Ok(guard)
}
