//! Registry of handlers keyed by work identifier.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::protocol::WorkOrder;

use super::{CleanupHook, DISPATCH_TARGET, DispatchError, WorkHandler};

/// Sub-key under which an identifier's cleanup hook is registered.
pub const CLEANUP: &str = "cleanup";

/// Lookup key for a dispatch entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchKey {
    /// A bare work identifier.
    Work(String),
    /// An identifier combined with a sub-key.
    Pair(String, String),
}

impl DispatchKey {
    /// Key for a bare identifier.
    pub fn work(identifier: impl Into<String>) -> Self {
        Self::Work(identifier.into())
    }

    /// Key for an identifier and sub-key.
    pub fn pair(identifier: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self::Pair(identifier.into(), sub_key.into())
    }

    /// Key of the identifier's cleanup hook.
    pub fn cleanup(identifier: impl Into<String>) -> Self {
        Self::pair(identifier, CLEANUP)
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Work(identifier) => formatter.write_str(identifier),
            Self::Pair(identifier, sub_key) => write!(formatter, "({identifier}, {sub_key})"),
        }
    }
}

/// Registered value: a work handler or a cleanup hook.
#[derive(Clone)]
pub enum DispatchEntry {
    /// Runs work for requests.
    Work(Arc<dyn WorkHandler>),
    /// Runs after requests for its identifier.
    Cleanup(Arc<dyn CleanupHook>),
}

impl fmt::Debug for DispatchEntry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Work(_) => formatter.write_str("Work(..)"),
            Self::Cleanup(_) => formatter.write_str("Cleanup(..)"),
        }
    }
}

/// Outcome of resolving a work order.
pub enum Resolution<'t, 'o> {
    /// A registered handler and the arguments it receives.
    Registered {
        /// Handler to invoke.
        handler: &'t Arc<dyn WorkHandler>,
        /// Arguments left after any consumed by the lookup.
        args: &'o [String],
    },
    /// An unregistered module, to be located and run as a process.
    Module {
        /// Module identifier.
        name: &'o str,
        /// Arguments for the module.
        args: &'o [String],
    },
    /// A script path, to be run as a process.
    Script {
        /// Path relative to the caller's directory, or absolute.
        path: &'o str,
        /// Arguments for the script.
        args: &'o [String],
    },
}

/// Mapping from dispatch keys to entries.
///
/// Cloning is cheap: entries are reference counted. Each worker clones the
/// shared table and then registers its own supervised entries.
#[derive(Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<DispatchKey, DispatchEntry>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_map()
            .entries(self.entries.iter())
            .finish()
    }
}

impl DispatchTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entry, replacing and returning any previous one.
    pub fn register(&mut self, key: DispatchKey, entry: DispatchEntry) -> Option<DispatchEntry> {
        debug!(target: DISPATCH_TARGET, key = %key, ?entry, "registering dispatch entry");
        self.entries.insert(key, entry)
    }

    /// Registers a handler under a bare identifier.
    pub fn register_work<H>(&mut self, identifier: impl Into<String>, handler: H)
    where
        H: WorkHandler + 'static,
    {
        self.register(
            DispatchKey::work(identifier),
            DispatchEntry::Work(Arc::new(handler)),
        );
    }

    /// Registers a handler that consumes its first argument as a sub-key.
    pub fn register_pair<H>(
        &mut self,
        identifier: impl Into<String>,
        sub_key: impl Into<String>,
        handler: H,
    ) where
        H: WorkHandler + 'static,
    {
        self.register(
            DispatchKey::pair(identifier, sub_key),
            DispatchEntry::Work(Arc::new(handler)),
        );
    }

    /// Registers the cleanup hook for an identifier.
    pub fn register_cleanup<C>(&mut self, identifier: impl Into<String>, hook: C)
    where
        C: CleanupHook + 'static,
    {
        self.register(
            DispatchKey::cleanup(identifier),
            DispatchEntry::Cleanup(Arc::new(hook)),
        );
    }

    /// Looks up an entry.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] when nothing is registered.
    pub fn resolve(&self, key: &DispatchKey) -> Result<&DispatchEntry, DispatchError> {
        self.entries.get(key).ok_or_else(|| DispatchError::NotFound {
            key: key.to_string(),
        })
    }

    /// Returns the cleanup hook registered for an identifier, if any.
    #[must_use]
    pub fn cleanup_hook(&self, identifier: &str) -> Option<&Arc<dyn CleanupHook>> {
        match self.resolve(&DispatchKey::cleanup(identifier)) {
            Ok(DispatchEntry::Cleanup(hook)) => Some(hook),
            _ => None,
        }
    }

    /// Registered keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &DispatchKey> {
        self.entries.keys()
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves a work order to a handler or an external target.
    ///
    /// Script paths are never looked up. A module identifier is tried as a
    /// bare key first, then paired with the first argument; a pair match
    /// consumes that argument. Anything else is an external module.
    #[must_use]
    pub fn resolve_order<'t, 'o>(&'t self, order: &'o WorkOrder) -> Resolution<'t, 'o> {
        let identifier = order.identifier();
        let args = order.args();
        if !order.is_module() {
            return Resolution::Script {
                path: identifier,
                args,
            };
        }

        if let Some(handler) = self.work_handler(&DispatchKey::work(identifier)) {
            return Resolution::Registered { handler, args };
        }

        if let Some((first, rest)) = args.split_first()
            && let Some(handler) = self.work_handler(&DispatchKey::pair(identifier, first))
        {
            return Resolution::Registered {
                handler,
                args: rest,
            };
        }

        Resolution::Module {
            name: identifier,
            args,
        }
    }

    fn work_handler(&self, key: &DispatchKey) -> Option<&Arc<dyn WorkHandler>> {
        match self.entries.get(key) {
            Some(DispatchEntry::Work(handler)) => Some(handler),
            _ => None,
        }
    }
}
