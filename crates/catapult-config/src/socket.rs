//! Location of the daemon socket.

use std::fmt;
use std::fs::{self, DirBuilder};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Filesystem location of the daemon's Unix socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketPath {
    path: Utf8PathBuf,
}

impl SocketPath {
    /// Wraps a socket location.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the socket location.
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        self.path.as_path()
    }

    /// Fails when anything already occupies the socket location.
    ///
    /// Stale sockets are never removed. Dangling symlinks count as occupied.
    pub fn ensure_vacant(&self) -> Result<(), SocketPreparationError> {
        match fs::symlink_metadata(self.path.as_std_path()) {
            Ok(_) => Err(SocketPreparationError::AlreadyExists {
                path: self.path.clone(),
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SocketPreparationError::Inspect {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Ensures the socket's parent directory exists with restrictive permissions.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(parent) = self.path.parent() else {
            return Err(SocketPreparationError::MissingParent {
                path: self.path.clone(),
            });
        };
        if parent.as_str().is_empty() {
            return Ok(());
        }

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        if let Err(source) = builder.create(parent.as_std_path())
            && source.kind() != io::ErrorKind::AlreadyExists
        {
            return Err(SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            });
        }

        Ok(())
    }

    /// Resolves the location against the current directory.
    ///
    /// The parent directory must already exist, so call this after
    /// [`Self::prepare_filesystem`]. Symlinks in the parent are resolved; the
    /// final component is kept as configured.
    pub fn absolutize(&self) -> Result<Self, SocketPreparationError> {
        let Some(name) = self.path.file_name() else {
            return Err(SocketPreparationError::MissingFileName {
                path: self.path.clone(),
            });
        };
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let resolved = parent
            .canonicalize_utf8()
            .map_err(|source| SocketPreparationError::Resolve {
                path: self.path.clone(),
                source,
            })?;
        Ok(Self::new(resolved.join(name)))
    }
}

impl fmt::Display for SocketPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "unix://{}", self.path)
    }
}

/// Errors raised while checking or preparing the socket location.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// Something already exists at the socket path.
    #[error("socket {path} already exists")]
    AlreadyExists { path: Utf8PathBuf },
    /// The socket path could not be inspected.
    #[error("failed to inspect socket path '{path}': {source}")]
    Inspect {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// The socket path has no parent component.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent { path: Utf8PathBuf },
    /// The socket path does not end in a file name.
    #[error("socket path '{path}' does not name a file")]
    MissingFileName { path: Utf8PathBuf },
    /// The socket directory could not be resolved to an absolute path.
    #[error("failed to resolve socket path '{path}': {source}")]
    Resolve {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed to create the socket directory.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}
