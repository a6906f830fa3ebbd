//! Pre-forked worker daemon.
//!
//! `catapultd` keeps a pool of worker processes listening on one Unix socket.
//! Expensive resources are loaded once, before the pool forks, and are then
//! shared copy-on-write by every worker, so each request only pays for the
//! work itself.
//!
//! A request names a unit of work: either a statically registered handler
//! (looked up in the [`dispatch`] table), an executable module on the module
//! path, or a script path. Workers run it in the caller's working directory,
//! capture its output, and reply over the same connection. Some handlers talk
//! to a long-lived helper process; each worker owns its own helper through a
//! [`supervisor::Supervisor`] that restarts it according to the configured
//! policy.
//!
//! The daemon runs until it receives a termination signal. Startup fails when
//! the socket path already exists.

mod bootstrap;
pub mod dispatch;
pub mod external;
pub mod handlers;
mod health;
mod pool;
pub mod protocol;
pub mod resources;
pub mod supervisor;
mod telemetry;
pub mod worker;

use std::convert::Infallible;
use std::sync::Arc;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use pool::{LaunchError, PoolShutdown, ShutdownError, ShutdownListener, run_pool};
pub use telemetry::{TelemetryError, TelemetryHandle};

/// Loads configuration from the environment and runs the pool.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap or pool startup fails. On success
/// the function never returns.
pub fn run_daemon() -> Result<Infallible, LaunchError> {
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    let daemon = bootstrap_with(&SystemConfigLoader, reporter)?;
    pool::run_pool(&daemon)
}

#[cfg(test)]
mod tests;
