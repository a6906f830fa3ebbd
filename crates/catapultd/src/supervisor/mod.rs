//! Lifecycle management for long-lived helper processes.
//!
//! Some handlers feed their input through an external helper program that is
//! expensive to start but cannot be trusted to serve many requests. A
//! [`Supervisor`] owns one helper per worker and moves it through three states:
//!
//! - `Unstarted`: nothing is running; the first [`Supervisor::acquire`]
//!   launches the helper.
//! - `Running`: the helper is live and handed out by `acquire`.
//! - `RestartPending`: the worker's cleanup hook (or an explicit
//!   [`Supervisor::request_restart`]) flagged the helper; the next `acquire`
//!   kills and reaps it, then launches a fresh one.
//!
//! Helpers that exit on their own are relaunched on the next `acquire` under
//! either restart policy. Launch failures are returned to the caller without
//! retry.

mod errors;
mod hook;
mod launcher;

use std::sync::Arc;

use catapult_config::RestartPolicy;
use tracing::{debug, warn};

use crate::health::HealthReporter;

pub use self::errors::SubprocessError;
pub use self::hook::SharedSupervisor;
pub use self::launcher::{
    CommandLauncher, HELPER_ENCODING_ENV, HELPER_MODEL_ENV, HelperChild, HelperLauncher,
    HelperProcess,
};

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// Observable state of a supervised helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubprocessState {
    /// No helper is running.
    Unstarted,
    /// A helper is running and will be reused.
    Running,
    /// A helper is running but will be replaced on the next acquire.
    RestartPending,
}

/// Current helper handle and its restart flag.
#[derive(Debug)]
pub struct SubprocessRecord<P> {
    process: Option<P>,
    restart_requested: bool,
}

impl<P> Default for SubprocessRecord<P> {
    fn default() -> Self {
        Self {
            process: None,
            restart_requested: false,
        }
    }
}

impl<P> SubprocessRecord<P> {
    /// Derives the state from the handle and flag.
    #[must_use]
    pub fn state(&self) -> SubprocessState {
        match (&self.process, self.restart_requested) {
            (None, _) => SubprocessState::Unstarted,
            (Some(_), false) => SubprocessState::Running,
            (Some(_), true) => SubprocessState::RestartPending,
        }
    }
}

/// Owns one helper process on behalf of a worker.
pub struct Supervisor<L: HelperLauncher> {
    id: String,
    launcher: L,
    policy: RestartPolicy,
    record: SubprocessRecord<L::Process>,
    reporter: Arc<dyn HealthReporter>,
}

impl<L: HelperLauncher> Supervisor<L> {
    /// Creates a supervisor in the `Unstarted` state.
    pub fn new(
        id: impl Into<String>,
        launcher: L,
        policy: RestartPolicy,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            id: id.into(),
            launcher,
            policy,
            record: SubprocessRecord::default(),
            reporter,
        }
    }

    /// Work identifier of the helper-backed handler.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubprocessState {
        self.record.state()
    }

    /// Restart policy applied after each request.
    #[must_use]
    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }

    /// Returns the running helper, launching or relaunching it as needed.
    ///
    /// # Errors
    ///
    /// Returns [`SubprocessError`] when a new helper cannot be launched. The
    /// supervisor is left `Unstarted` and the next call tries again.
    pub fn acquire(&mut self) -> Result<&mut L::Process, SubprocessError> {
        let process = match self.record.process.take() {
            Some(mut current) => {
                if self.needs_relaunch(&mut current) {
                    self.stop(current);
                    self.launch()?
                } else {
                    current
                }
            }
            None => self.launch()?,
        };
        self.record.restart_requested = false;
        Ok(self.record.process.insert(process))
    }

    /// Sends one batch of lines to the current helper.
    ///
    /// # Errors
    ///
    /// Propagates launch and i/o failures.
    pub fn exchange(&mut self, lines: &[String]) -> Result<Vec<String>, SubprocessError> {
        self.acquire()?.exchange(lines)
    }

    /// Applies the restart policy once a request for this helper finished.
    pub fn after_request(&mut self) {
        if self.policy == RestartPolicy::EveryRequest && self.record.process.is_some() {
            debug!(target: SUPERVISOR_TARGET, id = %self.id, "helper restart scheduled");
            self.record.restart_requested = true;
        }
    }

    /// Flags the running helper for replacement on the next acquire.
    pub fn request_restart(&mut self) {
        if self.record.process.is_some() {
            self.record.restart_requested = true;
        }
    }

    fn needs_relaunch(&self, process: &mut L::Process) -> bool {
        if self.record.restart_requested {
            return true;
        }
        if process.has_exited() {
            warn!(
                target: SUPERVISOR_TARGET,
                id = %self.id,
                pid = process.id(),
                "helper process exited on its own"
            );
            return true;
        }
        false
    }

    fn launch(&self) -> Result<L::Process, SubprocessError> {
        match self.launcher.launch() {
            Ok(process) => {
                self.reporter.helper_started(&self.id, process.id());
                Ok(process)
            }
            Err(error) => {
                self.reporter.helper_failed(&self.id, &error);
                Err(error)
            }
        }
    }

    fn stop(&self, mut process: L::Process) {
        let pid = process.id();
        match process.terminate() {
            Ok(()) => self.reporter.helper_stopped(&self.id, pid),
            Err(error) => self.reporter.helper_failed(&self.id, &error),
        }
    }
}

impl<L: HelperLauncher> std::fmt::Debug for Supervisor<L> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Supervisor")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
