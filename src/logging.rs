//! Tracing subscriber setup

use crate::error::{Error, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a console subscriber filtered by `RUST_LOG` plus `level`.
///
/// Returns `Error::Config` when a global subscriber is already installed.
pub fn init_tracing(level: &str, ansi: bool) -> Result<()> {
    let level = level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(ansi))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {}", e)))
}
