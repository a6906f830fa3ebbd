//! Typed view over decoded request fields.

use std::path::{Path, PathBuf};

/// Liveness probe token sent in place of a work identifier.
pub const PING: &str = "PING";

/// Reply to a liveness probe.
pub const PONG: &str = "PONG";

/// Marker announcing that the identifier names a module, not a script path.
pub const MODULE_MARKER: &str = "-m";

/// Fields of one decoded request, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    fields: Vec<String>,
}

impl WorkRequest {
    /// Wraps decoded fields.
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Returns the decoded fields.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Consumes the request, returning its fields.
    #[must_use]
    pub fn into_fields(self) -> Vec<String> {
        self.fields
    }

    /// Classifies the request.
    ///
    /// Exactly two fields with `PING` second is a probe. The module marker is
    /// only honoured when something follows it; after removing it a request
    /// needs at least a directory and an identifier.
    #[must_use]
    pub fn classify(self) -> Request {
        let mut fields = self.fields;
        if fields.len() == 2 && fields.get(1).is_some_and(|field| field == PING) {
            return Request::Ping;
        }

        let module_mode = fields.len() > 2 && fields.get(1).is_some_and(|f| f == MODULE_MARKER);
        if module_mode {
            fields.remove(1);
        }

        let mut fields = fields.into_iter();
        match (fields.next(), fields.next()) {
            (Some(caller_dir), Some(identifier)) => Request::Work(WorkOrder {
                caller_dir: PathBuf::from(caller_dir),
                identifier,
                args: fields.collect(),
                module_mode,
            }),
            (first, _) => Request::Unhandled {
                raw: first.unwrap_or_default(),
            },
        }
    }
}

/// A classified request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Liveness probe; answered with [`PONG`] and never dispatched.
    Ping,
    /// A unit of work to resolve and run.
    Work(WorkOrder),
    /// Too few fields to name any work.
    Unhandled {
        /// The request text as received, minus the terminator.
        raw: String,
    },
}

/// A unit of work requested by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrder {
    caller_dir: PathBuf,
    identifier: String,
    args: Vec<String>,
    module_mode: bool,
}

impl WorkOrder {
    /// Builds an order directly; used by tests and in-process callers.
    #[must_use]
    pub fn new(
        caller_dir: impl Into<PathBuf>,
        identifier: impl Into<String>,
        args: Vec<String>,
        module_mode: bool,
    ) -> Self {
        Self {
            caller_dir: caller_dir.into(),
            identifier: identifier.into(),
            args,
            module_mode,
        }
    }

    /// Working directory of the client that sent the request.
    #[must_use]
    pub fn caller_dir(&self) -> &Path {
        &self.caller_dir
    }

    /// Module identifier or script path.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Positional arguments following the identifier.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the identifier names a module rather than a script path.
    #[must_use]
    pub fn is_module(&self) -> bool {
        self.module_mode
    }
}
