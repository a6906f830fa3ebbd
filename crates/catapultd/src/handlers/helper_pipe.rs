//! Handler that streams a file through the supervised helper process.

use std::fs;
use std::io::Write;

use crate::dispatch::{Invocation, WorkError, WorkHandler};
use crate::supervisor::{HelperLauncher, SharedSupervisor};

/// Sends an input file's lines to the helper and writes its reply to a file.
#[derive(Debug)]
pub struct HelperPipe<L: HelperLauncher> {
    supervisor: SharedSupervisor<L>,
}

impl<L: HelperLauncher> HelperPipe<L> {
    /// Binds the handler to a worker's supervisor.
    pub fn new(supervisor: SharedSupervisor<L>) -> Self {
        Self { supervisor }
    }
}

impl<L> WorkHandler for HelperPipe<L>
where
    L: HelperLauncher + 'static,
{
    fn run(&self, invocation: &mut Invocation<'_>) -> Result<(), WorkError> {
        let [input, output] = invocation.args() else {
            return Err(WorkError::usage(format!(
                "{} <input> <output>",
                invocation.identifier()
            )));
        };
        let (input, output) = (input.clone(), output.clone());

        let text = fs::read_to_string(invocation.resolve_path(&input))
            .map_err(|source| WorkError::io(&input, source))?;
        let lines: Vec<String> = text.lines().map(str::to_owned).collect();

        let reply = self
            .supervisor
            .with_supervisor(|supervisor| supervisor.exchange(&lines))??;

        let mut written = reply.join("\n");
        if !written.is_empty() {
            written.push('\n');
        }
        fs::write(invocation.resolve_path(&output), written)
            .map_err(|source| WorkError::io(&output, source))?;
        writeln!(
            invocation.output(),
            "helper returned {} lines for {input}",
            reply.len()
        )
        .map_err(|source| WorkError::io("response", source))
    }
}
