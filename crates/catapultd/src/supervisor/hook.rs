//! Shared access to a supervisor from handlers and cleanup hooks.

use std::sync::{Arc, Mutex};

use crate::dispatch::{CleanupHook, WorkError};

use super::{HelperLauncher, SubprocessError, Supervisor};

/// Cloneable handle to one worker's supervisor.
///
/// The helper-backed handler and the identifier's cleanup hook both hold a
/// clone, so the handler always reaches the current helper and the hook can
/// schedule its replacement.
pub struct SharedSupervisor<L: HelperLauncher> {
    inner: Arc<Mutex<Supervisor<L>>>,
}

impl<L: HelperLauncher> Clone for SharedSupervisor<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: HelperLauncher> SharedSupervisor<L> {
    /// Wraps a supervisor for sharing.
    pub fn new(supervisor: Supervisor<L>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(supervisor)),
        }
    }

    /// Runs a closure with exclusive access to the supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`SubprocessError::Poisoned`] if a previous holder panicked.
    pub fn with_supervisor<F, R>(&self, f: F) -> Result<R, SubprocessError>
    where
        F: FnOnce(&mut Supervisor<L>) -> R,
    {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| SubprocessError::Poisoned)?;
        Ok(f(&mut guard))
    }
}

impl<L: HelperLauncher> std::fmt::Debug for SharedSupervisor<L> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("SharedSupervisor").finish_non_exhaustive()
    }
}

impl<L> CleanupHook for SharedSupervisor<L>
where
    L: HelperLauncher + 'static,
{
    fn after_request(&self) -> Result<(), WorkError> {
        self.with_supervisor(Supervisor::after_request)
            .map_err(WorkError::from)
    }
}
