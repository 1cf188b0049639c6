//! Subscriber setup for the harvest binary.
//!
//! `RUST_LOG` wins over the caller's default filter. `HARVEST_LOG_STYLE`
//! picks the line layout: `full` (target, file and line) or `compact`.
use crate::util::env::env_opt;
use anyhow::{anyhow, bail, Context, Result};
use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogStyle {
    #[default]
    Full,
    /// One short line per event, no source location. Suited to long unattended runs.
    Compact,
}

impl FromStr for LogStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(LogStyle::Full),
            "compact" => Ok(LogStyle::Compact),
            other => bail!("unknown log style {other:?} (expected full|compact)"),
        }
    }
}

pub fn init_tracing(default_filter: &str) -> Result<()> {
    let style = match env_opt("HARVEST_LOG_STYLE") {
        Some(raw) => raw.parse().context("HARVEST_LOG_STYLE")?,
        None => LogStyle::default(),
    };
    init_tracing_with(default_filter, style)
}

/// Install the global subscriber. Errors if one is already set.
pub fn init_tracing_with(default_filter: &str, style: LogStyle) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid log filter {default_filter:?}"))?,
    };

    let builder = fmt().with_env_filter(filter);
    let installed = match style {
        LogStyle::Full => builder
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .try_init(),
        LogStyle::Compact => builder.with_target(false).compact().try_init(),
    };
    installed.map_err(|e| anyhow!("failed to initialize tracing: {e}"))
}
