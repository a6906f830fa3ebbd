//! Error types for dispatch and work execution.
//!
//! [`WorkError`] is what handlers return. The worker sorts failures into two
//! classes: missing resources, which are reported with a single line, and
//! everything else, which is reported with its full cause chain.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

use crate::supervisor::SubprocessError;

/// Errors surfaced while resolving a dispatch key.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No entry is registered under the key.
    #[error("no handler registered for {key}")]
    NotFound { key: String },
}

/// Failures raised while executing a unit of work.
#[derive(Debug, Error)]
pub enum WorkError {
    /// A script, module, directory or input file does not exist.
    #[error("no such file or module: {what}")]
    NotFound {
        what: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The request named a caller directory that is not absolute.
    #[error("caller directory must be an absolute path: {dir}")]
    RelativeDirectory { dir: String },

    /// The handler rejected its arguments.
    #[error("usage: {usage}")]
    Usage { usage: String },

    /// The handler failed.
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// The helper process could not be started or driven.
    #[error("helper process failed: {0}")]
    Subprocess(#[from] SubprocessError),

    /// The handler panicked.
    #[error("handler panicked: {message}")]
    Panicked { message: String },
}

impl WorkError {
    /// Creates a not-found error for the named resource.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            source: None,
        }
    }

    /// Creates a usage error.
    pub fn usage(usage: impl Into<String>) -> Self {
        Self::Usage {
            usage: usage.into(),
        }
    }

    /// Creates a failure without an underlying cause.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an IO error raised while touching `what`.
    ///
    /// Missing files are classified as [`WorkError::NotFound`].
    pub fn io(what: impl Into<String>, source: io::Error) -> Self {
        let what = what.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                what,
                source: Some(source),
            }
        } else {
            Self::Failed {
                message: format!("{what}: {source}"),
                source: Some(Box::new(source)),
            }
        }
    }

    /// Returns `true` for the missing-resource class of failures.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
