//! Structured telemetry for the daemon and its forked workers.
//!
//! The subscriber is installed once, in the pool manager, before any worker
//! is forked. Workers inherit it together with the stderr descriptor, so every
//! process writes to the same stream; [`TelemetryHandle::worker_span`] tags a
//! worker's events with its index and pid so interleaved lines stay
//! attributable.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Span, info_span};
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

use catapult_config::{Config, LogFormat};

const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Proof that telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

impl TelemetryHandle {
    /// Span under which a worker records everything it logs.
    #[must_use]
    pub fn worker_span(self, index: usize) -> Span {
        info_span!(target: TELEMETRY_TARGET, "worker", index, pid = std::process::id())
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another global subscriber is already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] TryInitError),
}

/// Installs the global subscriber on first use; later calls are no-ops.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let layer = match config.log_format() {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(io::stderr)
            .with_timer(UtcTime::rfc_3339())
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(io::stderr().is_terminal())
            .with_writer(io::stderr)
            .with_timer(UtcTime::rfc_3339())
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filters_are_rejected_before_installing() {
        let config = Config {
            log_filter: Some("catapultd=loudest".to_owned()),
            ..Config::default()
        };
        let error = install_subscriber(&config).expect_err("invalid filter");
        assert!(matches!(error, TelemetryError::Filter(_)));
    }
}
