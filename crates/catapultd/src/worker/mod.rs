//! The per-process request loop.
//!
//! A worker owns its dispatch table and serves one connection at a time:
//! decode the request, answer probes, otherwise change into the caller's
//! directory, run the resolved work with output captured by an
//! [`OutputSink`], restore the directory, run the identifier's cleanup hook
//! and close the connection. Failures and panics are contained per
//! connection; the loop only ends with the process.

mod cwd;
mod sink;

use std::any::Any;
use std::io::{self, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchTable, Invocation, Resolution, WorkError};
use crate::external::ExternalRunner;
use crate::protocol::{self, FrameSource, PONG, ProtocolError, Request, WorkOrder};

pub use self::cwd::WorkingDirectory;
pub use self::sink::OutputSink;

pub(crate) const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// A single-threaded request server.
#[derive(Debug, Clone)]
pub struct Worker {
    index: usize,
    table: DispatchTable,
    external: ExternalRunner,
    verbose: bool,
}

impl Worker {
    /// Builds a worker over its own dispatch table.
    #[must_use]
    pub fn new(index: usize, table: DispatchTable, external: ExternalRunner, verbose: bool) -> Self {
        Self {
            index,
            table,
            external,
            verbose,
        }
    }

    /// Position of the worker in the pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Accepts and serves connections forever.
    pub fn run(&self, listener: &UnixListener) -> ! {
        info!(target: WORKER_TARGET, worker = self.index, "worker accepting connections");
        let mut last_error = None::<io::ErrorKind>;
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    last_error = None;
                    self.handle_connection(stream);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(
                            target: WORKER_TARGET,
                            worker = self.index,
                            %error,
                            "socket accept error"
                        );
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
    }

    /// Serves one accepted connection and closes it.
    pub fn handle_connection(&self, mut stream: UnixStream) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.serve(&mut stream)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(
                target: WORKER_TARGET,
                worker = self.index,
                %error,
                "connection error"
            ),
            Err(payload) => error!(
                target: WORKER_TARGET,
                worker = self.index,
                panic = %panic_message(payload.as_ref()),
                "request handling panicked"
            ),
        }
        if let Err(error) = stream.shutdown(Shutdown::Both)
            && error.kind() != io::ErrorKind::NotConnected
        {
            debug!(target: WORKER_TARGET, %error, "failed to shut down connection");
        }
    }

    /// Reads one request from `stream` and writes the response.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when the connection fails; malformed requests
    /// are answered, not returned.
    pub fn serve<S: FrameSource + Write>(&self, stream: &mut S) -> Result<(), ProtocolError> {
        let request = match protocol::decode(stream) {
            Ok(request) => request,
            Err(error) if error.is_malformed() => {
                warn!(target: WORKER_TARGET, %error, "malformed request");
                return protocol::send(stream, &format!("Cannot handle request: {error}\n"));
            }
            Err(error) => return Err(error),
        };

        match request.classify() {
            Request::Ping => {
                info!(target: WORKER_TARGET, "ping requested");
                protocol::send(stream, PONG)
            }
            Request::Unhandled { raw } => {
                info!(target: WORKER_TARGET, request = %raw, "cannot handle request");
                protocol::send(stream, &format!("Cannot handle {raw}\n"))
            }
            Request::Work(order) => self.run_order(&order, stream),
        }
    }

    fn run_order<S: Write>(&self, order: &WorkOrder, stream: &mut S) -> Result<(), ProtocolError> {
        let identifier = order.identifier();
        info!(target: WORKER_TARGET, worker = self.index, work = identifier, "running");
        debug!(
            target: WORKER_TARGET,
            args = ?order.args(),
            dir = %order.caller_dir().display(),
            module = order.is_module(),
            "work order"
        );
        let started = Instant::now();

        let mut sink = OutputSink::new(stream, self.verbose);
        let result = self.execute(order, &mut sink);
        self.run_cleanup(identifier);

        let delivered = match result {
            Ok(()) => Ok(()),
            Err(failure) => self.report_failure(identifier, failure, &mut sink),
        };
        info!(
            target: WORKER_TARGET,
            worker = self.index,
            work = identifier,
            output_bytes = sink.captured(),
            elapsed_ms = started.elapsed().as_millis(),
            "completed"
        );
        delivered
    }

    fn execute<W: Write>(
        &self,
        order: &WorkOrder,
        sink: &mut OutputSink<'_, W>,
    ) -> Result<(), WorkError> {
        let _scope = WorkingDirectory::enter(order.caller_dir())?;
        panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(order, sink))).unwrap_or_else(
            |payload| {
                Err(WorkError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            },
        )
    }

    fn dispatch<W: Write>(
        &self,
        order: &WorkOrder,
        sink: &mut OutputSink<'_, W>,
    ) -> Result<(), WorkError> {
        let caller_dir = order.caller_dir();
        match self.table.resolve_order(order) {
            Resolution::Registered { handler, args } => {
                let mut invocation = Invocation::new(order.identifier(), args, caller_dir, sink);
                handler.run(&mut invocation)
            }
            Resolution::Module { name, args } => {
                self.external.run_module(caller_dir, name, args, sink)
            }
            Resolution::Script { path, args } => {
                self.external.run_script(caller_dir, path, args, sink)
            }
        }
    }

    fn run_cleanup(&self, identifier: &str) {
        let Some(hook) = self.table.cleanup_hook(identifier) else {
            return;
        };
        if let Err(error) = hook.after_request() {
            error!(
                target: WORKER_TARGET,
                work = identifier,
                %error,
                "cleanup hook failed"
            );
        }
    }

    fn report_failure<W: Write>(
        &self,
        identifier: &str,
        failure: WorkError,
        sink: &mut OutputSink<'_, W>,
    ) -> Result<(), ProtocolError> {
        let message = format!("{failure}\n");
        if failure.is_not_found() {
            warn!(target: WORKER_TARGET, work = identifier, error = %failure, "work not found");
            return sink.deliver_error(&message);
        }

        let trace = format!("{:?}", anyhow::Error::new(failure));
        error!(target: WORKER_TARGET, work = identifier, %trace, "work failed");
        sink.deliver_error(&message)?;
        if self.verbose {
            sink.deliver_error(&format!("{trace}\n"))?;
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
