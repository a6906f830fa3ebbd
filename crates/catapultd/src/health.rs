//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use catapult_config::Config;

use crate::bootstrap::BootstrapError;
use crate::resources::LexiconSet;
use crate::supervisor::SubprocessError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once preloaded resources are in memory.
    fn resources_loaded(&self, lexicons: &LexiconSet);

    /// Invoked when a worker enters its accept loop.
    fn worker_started(&self, index: usize, pid: u32);

    /// Invoked after a helper process is launched.
    fn helper_started(&self, id: &str, pid: u32);

    /// Invoked after a helper process is stopped and reaped.
    fn helper_stopped(&self, id: &str, pid: u32);

    /// Invoked when launching or stopping a helper fails.
    fn helper_failed(&self, id: &str, error: &SubprocessError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn resources_loaded(&self, lexicons: &LexiconSet) {
        (**self).resources_loaded(lexicons);
    }

    fn worker_started(&self, index: usize, pid: u32) {
        (**self).worker_started(index, pid);
    }

    fn helper_started(&self, id: &str, pid: u32) {
        (**self).helper_started(id, pid);
    }

    fn helper_stopped(&self, id: &str, pid: u32) {
        (**self).helper_stopped(id, pid);
    }

    fn helper_failed(&self, id: &str, error: &SubprocessError) {
        (**self).helper_failed(id, error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        let workers = config.worker_count();
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = ?config.socket_path,
            workers = workers.count.get(),
            verbose = config.verbose(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn resources_loaded(&self, lexicons: &LexiconSet) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "resources_loaded",
            lexicons = lexicons.len(),
            entries = lexicons.entry_count(),
            "preloaded resources"
        );
    }

    fn worker_started(&self, index: usize, pid: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "worker_started",
            worker = index,
            pid,
            "worker accepting connections"
        );
    }

    fn helper_started(&self, id: &str, pid: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "helper_started",
            helper = id,
            pid,
            "helper process started"
        );
    }

    fn helper_stopped(&self, id: &str, pid: u32) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "helper_stopped",
            helper = id,
            pid,
            "helper process stopped"
        );
    }

    fn helper_failed(&self, id: &str, error: &SubprocessError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "helper_failed",
            helper = id,
            error = %error,
            "helper process failure"
        );
    }
}
