//! Entrypoint for the catapult worker daemon.
//!
//! Delegates to [`catapultd::run_daemon`]; only a failed startup returns.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    let Err(error) = catapultd::run_daemon();
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "catapultd: {error}");
    ExitCode::FAILURE
}
