//! Tracing subscriber setup
//!
//! Logs go to stderr; stdout is reserved for the summary, the dry-run
//! command and the inspection report.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::LogFormat;

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(level))
            .with_context(|| format!("invalid log level {:?}", level))?,
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}

/// Map operator-facing level names onto tracing levels
fn filter_directive(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        "" => "info".to_string(),
        other => other.to_string(),
    }
}
