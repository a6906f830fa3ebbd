//! Running unregistered work as external processes.
//!
//! Script paths are resolved against the caller's directory. Module
//! identifiers are looked up as executables on the configured module path.
//! Either way the process runs in the caller's directory with the request's
//! positional arguments; its stdout and stderr are copied to the request's
//! output sink once it exits.

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use camino::Utf8PathBuf;
use tracing::debug;

use crate::dispatch::WorkError;

const EXTERNAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::external");

/// Spawns scripts and modules that have no registered handler.
#[derive(Debug, Clone, Default)]
pub struct ExternalRunner {
    module_dirs: Vec<Utf8PathBuf>,
}

impl ExternalRunner {
    /// Builds a runner searching `module_dirs` for modules.
    #[must_use]
    pub fn new(module_dirs: Vec<Utf8PathBuf>) -> Self {
        Self { module_dirs }
    }

    /// Directories searched for modules.
    #[must_use]
    pub fn module_dirs(&self) -> &[Utf8PathBuf] {
        &self.module_dirs
    }

    /// Runs a script file.
    ///
    /// # Errors
    ///
    /// [`WorkError::NotFound`] when the script does not exist, otherwise
    /// [`WorkError::Failed`] when it cannot be run or exits unsuccessfully.
    pub fn run_script(
        &self,
        caller_dir: &Path,
        path: &str,
        args: &[String],
        output: &mut dyn Write,
    ) -> Result<(), WorkError> {
        let script = caller_dir.join(path);
        if !script.is_file() {
            return Err(WorkError::not_found(path));
        }
        run(&script, path, caller_dir, args, output)
    }

    /// Locates a module on the module path and runs it.
    ///
    /// # Errors
    ///
    /// [`WorkError::NotFound`] when no module directory holds an executable
    /// of that name, otherwise as for [`ExternalRunner::run_script`].
    pub fn run_module(
        &self,
        caller_dir: &Path,
        name: &str,
        args: &[String],
        output: &mut dyn Write,
    ) -> Result<(), WorkError> {
        let program = self.locate_module(caller_dir, name)?;
        run(&program, name, caller_dir, args, output)
    }

    fn locate_module(&self, caller_dir: &Path, name: &str) -> Result<PathBuf, WorkError> {
        if self.module_dirs.is_empty() {
            return Err(WorkError::not_found(name));
        }
        let search = env::join_paths(&self.module_dirs).map_err(|source| WorkError::Failed {
            message: format!("invalid module path: {source}"),
            source: Some(Box::new(source)),
        })?;
        which::which_in(name, Some(search), caller_dir).map_err(|source| WorkError::NotFound {
            what: name.to_owned(),
            source: Some(std::io::Error::other(source)),
        })
    }
}

fn run(
    program: &Path,
    label: &str,
    caller_dir: &Path,
    args: &[String],
    output: &mut dyn Write,
) -> Result<(), WorkError> {
    debug!(
        target: EXTERNAL_TARGET,
        program = %program.display(),
        args = ?args,
        "running external work"
    );
    let Output {
        status,
        stdout,
        stderr,
    } = Command::new(program)
        .args(args)
        .current_dir(caller_dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| WorkError::io(label, source))?;

    output
        .write_all(&stdout)
        .and_then(|()| output.write_all(&stderr))
        .map_err(|source| WorkError::io(label, source))?;

    if status.success() {
        Ok(())
    } else {
        Err(WorkError::failed(format!("{label} exited with {status}")))
    }
}
