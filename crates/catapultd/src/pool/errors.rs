//! Unified error surface for launching the worker pool.

use std::io;

use camino::Utf8PathBuf;
use nix::errno::Errno;
use thiserror::Error;

use crate::bootstrap::BootstrapError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching the pool.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrapping the daemon failed.
    #[error("daemon bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// Binding the listening socket failed.
    #[error("failed to bind socket '{path}': {source}")]
    Bind {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Forking a worker process failed.
    #[error("failed to fork worker {index}: {source}")]
    Fork {
        /// Index of the worker being forked.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Installing shutdown handling failed.
    #[error("failed to install shutdown handling: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
