use std::num::NonZeroUsize;
use std::thread;

/// Identifier the supervised helper handler is registered under.
pub const DEFAULT_HELPER_ID: &str = "helper.pipe";

/// Text encoding announced to helper processes.
pub const DEFAULT_HELPER_ENCODING: &str = "utf-8";

/// Number of workers used when the configured count is absent or invalid.
///
/// Falls back to a single worker when the host parallelism cannot be queried.
#[must_use]
pub fn default_worker_count() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}
