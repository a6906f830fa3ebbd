//! Handler contracts and the per-call invocation context.

use std::io::Write;
use std::path::{Path, PathBuf};

use super::WorkError;

/// Everything a handler sees of one request.
///
/// The output writer is the request's capture sink: whatever a handler writes
/// is logged and, in verbose mode, forwarded to the client. The caller's
/// directory is passed explicitly so handlers resolve relative paths without
/// consulting the process working directory.
pub struct Invocation<'a> {
    identifier: &'a str,
    args: &'a [String],
    caller_dir: &'a Path,
    output: &'a mut dyn Write,
}

impl<'a> Invocation<'a> {
    /// Assembles the context for one call.
    pub fn new(
        identifier: &'a str,
        args: &'a [String],
        caller_dir: &'a Path,
        output: &'a mut dyn Write,
    ) -> Self {
        Self {
            identifier,
            args,
            caller_dir,
            output,
        }
    }

    /// Identifier the handler was resolved from.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.identifier
    }

    /// Positional arguments left after resolution.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.args
    }

    /// Working directory of the client.
    #[must_use]
    pub fn caller_dir(&self) -> &Path {
        self.caller_dir
    }

    /// Resolves a client-supplied path against the caller's directory.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        self.caller_dir.join(path)
    }

    /// Capture sink for this request.
    pub fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }
}

/// A statically registered unit of work.
pub trait WorkHandler: Send + Sync {
    /// Runs the work for one request.
    fn run(&self, invocation: &mut Invocation<'_>) -> Result<(), WorkError>;
}

/// Hook run by the worker after every request for its identifier.
pub trait CleanupHook: Send + Sync {
    /// Called once per request, whether the handler succeeded or not.
    fn after_request(&self) -> Result<(), WorkError>;
}
