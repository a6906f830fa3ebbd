//! The pre-forked worker pool.
//!
//! The manager binds the socket, forks `N - 1` workers that inherit the
//! listener and the preloaded state, starts the shutdown watcher and finally
//! becomes worker 0 itself. All workers block in `accept` on the same socket;
//! the kernel hands each connection to exactly one of them.

mod errors;
mod shutdown;

use std::convert::Infallible;
use std::os::unix::net::UnixListener;

use nix::unistd::{ForkResult, Pid, fork};
use tracing::info;

use crate::bootstrap::Daemon;
use crate::handlers;
use crate::worker::Worker;

pub use self::errors::LaunchError;
pub use self::shutdown::{PoolShutdown, ShutdownError, ShutdownListener, spawn_watcher};

pub(crate) const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pool");

/// Binds the socket, forks the workers and serves requests until killed.
///
/// # Errors
///
/// Returns [`LaunchError`] when binding, forking or installing shutdown
/// handling fails. On success the function never returns.
pub fn run_pool(daemon: &Daemon) -> Result<Infallible, LaunchError> {
    let socket = daemon.socket().as_path();
    let listener =
        UnixListener::bind(socket.as_std_path()).map_err(|source| LaunchError::Bind {
            path: socket.to_owned(),
            source,
        })?;
    let count = daemon.workers().count.get();
    info!(
        target: POOL_TARGET,
        socket = %daemon.socket(),
        workers = count,
        "listening"
    );

    let mut children: Vec<Pid> = Vec::with_capacity(count.saturating_sub(1));
    for index in 1..count {
        // SAFETY: the manager has not started any thread yet, and the child
        // goes straight into its accept loop.
        match unsafe { fork() }.map_err(|source| LaunchError::Fork { index, source })? {
            ForkResult::Child => start_worker(index, daemon, &listener),
            ForkResult::Parent { child } => children.push(child),
        }
    }

    let watcher = ShutdownListener::install()?;
    spawn_watcher(watcher, PoolShutdown::new(children, socket.to_owned()))?;

    start_worker(0, daemon, &listener)
}

/// Builds a worker's own dispatch table and enters its accept loop.
fn start_worker(index: usize, daemon: &Daemon, listener: &UnixListener) -> ! {
    let _span = daemon.telemetry().worker_span(index).entered();
    let mut table = daemon.table().clone();
    for helper in daemon.helpers() {
        handlers::register_helper(&mut table, helper.clone(), daemon.reporter());
    }
    daemon
        .reporter()
        .worker_started(index, std::process::id());
    Worker::new(index, table, daemon.external().clone(), daemon.verbose()).run(listener)
}
