//! Work identifier dispatch.
//!
//! The dispatch table maps typed keys to handler objects. A key is either a
//! bare work identifier or an identifier paired with a sub-key; pairs serve
//! both handlers that consume a leading argument as part of their name and
//! side channels such as the per-identifier cleanup hook.
//!
//! Handlers capture whatever they are bound to (a preloaded lexicon, a
//! supervisor owning a helper process) when they are constructed, so the
//! table only ever stores ready-to-call objects. The shared part of the table
//! is built once before the pool forks; each worker then adds the entries that
//! own per-worker state.

mod errors;
mod handler;
mod table;

pub use self::errors::{DispatchError, WorkError};
pub use self::handler::{CleanupHook, Invocation, WorkHandler};
pub use self::table::{CLEANUP, DispatchEntry, DispatchKey, DispatchTable, Resolution};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
