//! Errors raised while driving a helper process.

use std::io;

use thiserror::Error;

/// Failures from launching, talking to, or stopping a helper process.
#[derive(Debug, Error)]
pub enum SubprocessError {
    /// The helper executable could not be started.
    #[error("failed to launch helper '{program}': {source}")]
    Launch {
        /// Program that was launched.
        program: String,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// Killing or reaping the helper failed.
    #[error("failed to stop helper process {pid}: {source}")]
    Terminate {
        /// Process identifier of the helper.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Reading from or writing to the helper failed.
    #[error("helper process {pid} i/o failed: {source}")]
    Io {
        /// Process identifier of the helper.
        pid: u32,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The helper was launched without a piped standard stream.
    #[error("helper process {pid} has no {stream} pipe")]
    MissingPipe {
        /// Process identifier of the helper.
        pid: u32,
        /// Name of the missing stream.
        stream: &'static str,
    },
    /// The supervisor lock was poisoned by a panic in another handler.
    #[error("helper supervisor lock poisoned")]
    Poisoned,
}

impl SubprocessError {
    pub(crate) fn io(pid: u32, source: io::Error) -> Self {
        Self::Io { pid, source }
    }
}
