//! Termination handling for the pool manager.
//!
//! Only the pool manager listens for termination signals; forked workers keep
//! the default dispositions and die when the manager signals them.

use std::fs;
use std::io;
use std::thread::{self, JoinHandle};

use camino::Utf8PathBuf;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::POOL_TARGET;

/// Errors reported by shutdown handling.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Starting the watcher thread failed.
    #[error("failed to start shutdown watcher: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Blocks until a termination signal arrives.
pub struct ShutdownListener {
    signals: Signals,
}

impl ShutdownListener {
    /// Registers for SIGTERM, SIGINT, SIGQUIT and SIGHUP.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when registration fails.
    pub fn install() -> Result<Self, ShutdownError> {
        let signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        Ok(Self { signals })
    }

    /// Waits for the next signal and returns its number.
    pub fn wait(&mut self) -> Option<i32> {
        self.signals.forever().next()
    }
}

/// What the manager tears down on shutdown.
#[derive(Debug, Clone)]
pub struct PoolShutdown {
    children: Vec<Pid>,
    socket: Utf8PathBuf,
}

impl PoolShutdown {
    /// Records the forked workers and the socket the manager bound.
    #[must_use]
    pub fn new(children: Vec<Pid>, socket: Utf8PathBuf) -> Self {
        Self { children, socket }
    }

    /// Terminates and reaps every worker, then removes the socket file.
    pub fn terminate(&self) {
        for &child in &self.children {
            match kill(child, Signal::SIGTERM) {
                Ok(()) => {}
                Err(Errno::ESRCH) => {
                    debug!(target: POOL_TARGET, pid = child.as_raw(), "worker already gone");
                }
                Err(error) => {
                    warn!(target: POOL_TARGET, pid = child.as_raw(), %error, "failed to signal worker");
                    continue;
                }
            }
            if let Err(error) = waitpid(child, None)
                && error != Errno::ECHILD
            {
                warn!(target: POOL_TARGET, pid = child.as_raw(), %error, "failed to reap worker");
            }
        }

        match fs::remove_file(self.socket.as_std_path()) {
            Ok(()) => debug!(target: POOL_TARGET, socket = %self.socket, "socket removed"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(
                target: POOL_TARGET,
                socket = %self.socket,
                %error,
                "failed to remove socket"
            ),
        }
    }
}

/// Runs the shutdown sequence on a dedicated thread once a signal arrives.
///
/// The thread exits the whole process after tearing the pool down.
///
/// # Errors
///
/// Returns [`ShutdownError::Spawn`] when the thread cannot be started.
pub fn spawn_watcher(
    mut listener: ShutdownListener,
    shutdown: PoolShutdown,
) -> Result<JoinHandle<()>, ShutdownError> {
    thread::Builder::new()
        .name("catapult-shutdown".to_owned())
        .spawn(move || {
            if let Some(signal) = listener.wait() {
                info!(target: POOL_TARGET, signal, "shutdown signal received");
                shutdown.terminate();
                std::process::exit(0);
            }
        })
        .map_err(|source| ShutdownError::Spawn { source })
}
