//! Launching helper processes and talking to them over their standard streams.

use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;

use catapult_config::HelperConfig;
use tracing::{debug, warn};

use super::{SUPERVISOR_TARGET, SubprocessError};

/// Environment variable announcing the text encoding to the helper.
pub const HELPER_ENCODING_ENV: &str = "CATAPULT_HELPER_ENCODING";

/// Environment variable carrying the configured model path to the helper.
pub const HELPER_MODEL_ENV: &str = "CATAPULT_HELPER_MODEL";

/// A running helper process.
pub trait HelperProcess: Send {
    /// Operating system process identifier.
    fn id(&self) -> u32;

    /// Returns `true` once the process has exited on its own.
    fn has_exited(&mut self) -> bool;

    /// Kills and reaps the process.
    fn terminate(&mut self) -> Result<(), SubprocessError>;

    /// Sends one batch of input lines and collects the reply lines.
    ///
    /// A batch is the input lines followed by an empty line; the reply ends at
    /// the first empty line the helper writes, or when it closes its output.
    fn exchange(&mut self, lines: &[String]) -> Result<Vec<String>, SubprocessError>;
}

/// Starts helper processes.
pub trait HelperLauncher: Send {
    /// Process type produced by this launcher.
    type Process: HelperProcess;

    /// Starts a new helper process.
    fn launch(&self) -> Result<Self::Process, SubprocessError>;
}

/// Launcher that spawns the configured helper executable.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    config: HelperConfig,
}

impl CommandLauncher {
    /// Builds a launcher for the resolved helper configuration.
    #[must_use]
    pub fn new(config: HelperConfig) -> Self {
        Self { config }
    }

    /// Configuration the launcher spawns from.
    #[must_use]
    pub fn config(&self) -> &HelperConfig {
        &self.config
    }
}

impl HelperLauncher for CommandLauncher {
    type Process = HelperChild;

    fn launch(&self) -> Result<HelperChild, SubprocessError> {
        debug!(
            target: SUPERVISOR_TARGET,
            id = %self.config.id,
            program = %self.config.program,
            args = ?self.config.args,
            "spawning helper process"
        );

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .env(HELPER_ENCODING_ENV, &self.config.encoding)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(model) = &self.config.model {
            command.env(HELPER_MODEL_ENV, model);
        }

        let child = command.spawn().map_err(|source| SubprocessError::Launch {
            program: self.config.program.clone(),
            source,
        })?;
        HelperChild::from_child(child)
    }
}

/// Helper process spawned by [`CommandLauncher`].
///
/// Dropping a handle that was not terminated kills the process, so a worker
/// never leaves an orphaned helper behind.
#[derive(Debug)]
pub struct HelperChild {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    reaped: bool,
}

impl HelperChild {
    fn from_child(mut child: Child) -> Result<Self, SubprocessError> {
        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            // Best effort: the handle is unusable either way.
            let _ = child.kill();
            let _ = child.wait();
            return Err(SubprocessError::MissingPipe {
                pid,
                stream: "stdio",
            });
        };
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            reaped: false,
        })
    }
}

/// Reads reply lines until an empty line or the end of the helper's output.
fn read_reply(
    pid: u32,
    stdout: &mut BufReader<ChildStdout>,
) -> Result<Vec<String>, SubprocessError> {
    let mut reply = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let read = stdout
            .read_line(&mut line)
            .map_err(|source| SubprocessError::io(pid, source))?;
        if read == 0 {
            break;
        }
        let text = line.trim_end_matches(['\n', '\r']);
        if text.is_empty() {
            break;
        }
        reply.push(text.to_owned());
    }
    Ok(reply)
}

impl HelperProcess for HelperChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(status) => status.is_some(),
            Err(error) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    pid = self.child.id(),
                    %error,
                    "failed to poll helper process"
                );
                true
            }
        }
    }

    fn terminate(&mut self) -> Result<(), SubprocessError> {
        let pid = self.id();
        self.reaped = true;
        self.child
            .kill()
            .and_then(|()| self.child.wait())
            .map(|status| {
                debug!(target: SUPERVISOR_TARGET, pid, %status, "helper process reaped");
            })
            .map_err(|source| SubprocessError::Terminate { pid, source })
    }

    fn exchange(&mut self, lines: &[String]) -> Result<Vec<String>, SubprocessError> {
        let pid = self.id();
        let mut batch = String::new();
        for line in lines.iter().filter(|line| !line.is_empty()) {
            batch.push_str(line);
            batch.push('\n');
        }
        batch.push('\n');

        // Filters stall on a full output pipe; write and read concurrently.
        let Self { stdin, stdout, .. } = self;
        thread::scope(|scope| {
            let writer = scope.spawn(move || {
                stdin
                    .write_all(batch.as_bytes())
                    .and_then(|()| stdin.flush())
            });
            let reply = read_reply(pid, stdout)?;
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("helper input writer panicked")));
            match written {
                Ok(()) => Ok(reply),
                Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        pid,
                        "helper closed its input before the batch was written"
                    );
                    Ok(reply)
                }
                Err(source) => Err(SubprocessError::io(pid, source)),
            }
        })
    }
}

impl Drop for HelperChild {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(error) = self.child.kill().and_then(|()| self.child.wait().map(drop)) {
            warn!(
                target: SUPERVISOR_TARGET,
                pid = self.child.id(),
                %error,
                "failed to stop helper process on drop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catapult_config::RestartPolicy;
    use rstest::{fixture, rstest};

    fn helper(program: &str, args: &[&str]) -> HelperConfig {
        HelperConfig {
            id: "helper.pipe".to_owned(),
            program: program.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            model: Some("model.bin".to_owned()),
            encoding: "utf-8".to_owned(),
            restart: RestartPolicy::EveryRequest,
        }
    }

    #[fixture]
    fn cat() -> CommandLauncher {
        CommandLauncher::new(helper("cat", &[]))
    }

    #[rstest]
    fn exchange_echoes_through_cat(cat: CommandLauncher) {
        let mut child = cat.launch().expect("cat starts");
        let reply = child
            .exchange(&["one".to_owned(), String::new(), "two".to_owned()])
            .expect("exchange");
        assert_eq!(reply, ["one", "two"]);
        let again = child.exchange(&["three".to_owned()]).expect("second batch");
        assert_eq!(again, ["three"]);
        child.terminate().expect("terminate");
        assert!(child.has_exited());
    }

    #[rstest]
    fn large_batches_do_not_stall_on_full_pipes(cat: CommandLauncher) {
        let lines: Vec<String> = (0..50_000).map(|i| format!("token number {i}")).collect();
        let (sender, receiver) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let mut child = cat.launch().expect("cat starts");
            let reply = child.exchange(&lines).expect("exchange");
            sender.send(reply).expect("send reply");
        });
        let reply = receiver
            .recv_timeout(std::time::Duration::from_secs(30))
            .expect("exchange finishes");
        assert_eq!(reply.len(), 50_000);
        assert_eq!(reply.first().map(String::as_str), Some("token number 0"));
        assert_eq!(reply.last().map(String::as_str), Some("token number 49999"));
    }

    #[rstest]
    fn dropping_the_handle_stops_the_helper(cat: CommandLauncher) {
        let child = cat.launch().expect("cat starts");
        let pid = nix::unistd::Pid::from_raw(i32::try_from(child.id()).expect("pid fits"));
        drop(child);
        let signalled = nix::sys::signal::kill(pid, None::<nix::sys::signal::Signal>);
        assert_eq!(signalled, Err(nix::errno::Errno::ESRCH));
    }

    #[test]
    fn helper_sees_encoding_and_model() {
        let launcher = CommandLauncher::new(helper(
            "sh",
            &[
                "-c",
                "read line; echo \"$CATAPULT_HELPER_ENCODING $CATAPULT_HELPER_MODEL $line\"; echo",
            ],
        ));
        let mut child = launcher.launch().expect("sh starts");
        let reply = child.exchange(&["ping".to_owned()]).expect("exchange");
        assert_eq!(reply, ["utf-8 model.bin ping"]);
    }

    #[test]
    fn missing_program_is_a_launch_error() {
        let launcher = CommandLauncher::new(helper("/nonexistent/catapult-helper", &[]));
        let error = launcher.launch().expect_err("spawn fails");
        assert!(matches!(error, SubprocessError::Launch { .. }));
    }

    #[test]
    fn reply_ends_when_helper_closes_output() {
        let launcher = CommandLauncher::new(helper("sh", &["-c", "read line; echo \"$line\""]));
        let mut child = launcher.launch().expect("sh starts");
        let reply = child.exchange(&["last".to_owned()]).expect("exchange");
        assert_eq!(reply, ["last"]);
    }
}
