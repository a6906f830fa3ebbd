//! Shared fixtures and doubles for the daemon test suites.

use std::cell::RefCell;
use std::env;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use catapult_config::{Config, RestartPolicy};
use once_cell::sync::Lazy;
use tempfile::TempDir;

use crate::bootstrap::BootstrapError;
use crate::dispatch::{CleanupHook, DispatchTable, Invocation, WorkError, WorkHandler};
use crate::external::ExternalRunner;
use crate::handlers::HelperPipe;
use crate::health::HealthReporter;
use crate::protocol;
use crate::resources::LexiconSet;
use crate::supervisor::{
    HelperLauncher, HelperProcess, SharedSupervisor, SubprocessError, SubprocessState,
    Supervisor,
};
use crate::worker::Worker;

static CWD_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialises tests that change or depend on the process working directory.
pub fn lock_cwd() -> MutexGuard<'static, ()> {
    CWD_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sends one encoded request to `worker` and returns the full reply.
pub fn send_request(worker: &Worker, fields: &[&str]) -> String {
    let (mut client, server) = UnixStream::pair().expect("socket pair");
    client
        .write_all(&protocol::encode(fields))
        .expect("write request");
    worker.handle_connection(server);
    let mut reply = String::new();
    client.read_to_string(&mut reply).expect("read reply");
    reply
}

/// Lifecycle events observed by [`RecordingLauncher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperEvent {
    Launched(u32),
    Terminated(u32),
}

/// Launcher double that records launches and terminations.
#[derive(Clone, Default)]
pub struct RecordingLauncher {
    events: Arc<Mutex<Vec<HelperEvent>>>,
    next_pid: Arc<AtomicU32>,
    exited: Arc<AtomicBool>,
    fail: bool,
}

impl RecordingLauncher {
    /// A launcher whose every launch fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A launcher whose helpers get pids above `offset`.
    pub fn with_pid_offset(offset: u32) -> Self {
        Self {
            next_pid: Arc::new(AtomicU32::new(offset)),
            ..Self::default()
        }
    }

    /// Makes the current helper report that it exited on its own.
    pub fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<HelperEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl HelperLauncher for RecordingLauncher {
    type Process = FakeHelper;

    fn launch(&self) -> Result<FakeHelper, SubprocessError> {
        if self.fail {
            return Err(SubprocessError::Launch {
                program: "fake-helper".to_owned(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst) + 1;
        self.events
            .lock()
            .expect("events lock")
            .push(HelperEvent::Launched(pid));
        Ok(FakeHelper {
            pid,
            events: Arc::clone(&self.events),
            exited: Arc::clone(&self.exited),
        })
    }
}

/// Helper double that prefixes each line with its pid.
#[derive(Debug)]
pub struct FakeHelper {
    pid: u32,
    events: Arc<Mutex<Vec<HelperEvent>>>,
    exited: Arc<AtomicBool>,
}

impl HelperProcess for FakeHelper {
    fn id(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        self.exited.swap(false, Ordering::SeqCst)
    }

    fn terminate(&mut self) -> Result<(), SubprocessError> {
        self.events
            .lock()
            .expect("events lock")
            .push(HelperEvent::Terminated(self.pid));
        Ok(())
    }

    fn exchange(&mut self, lines: &[String]) -> Result<Vec<String>, SubprocessError> {
        Ok(lines
            .iter()
            .filter(|line| !line.is_empty())
            .map(|line| format!("{}:{line}", self.pid))
            .collect())
    }
}

/// Handler that counts its invocations and echoes its arguments.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    calls: Arc<AtomicUsize>,
}

impl RecordingHandler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WorkHandler for RecordingHandler {
    fn run(&self, invocation: &mut Invocation<'_>) -> Result<(), WorkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let line = invocation.args().join(" ");
        writeln!(invocation.output(), "ran with {line}")
            .map_err(|source| WorkError::io("response", source))
    }
}

/// Handler that always fails.
pub struct FailingHandler;

impl WorkHandler for FailingHandler {
    fn run(&self, _invocation: &mut Invocation<'_>) -> Result<(), WorkError> {
        Err(WorkError::failed("deliberate failure"))
    }
}

/// Cleanup hook that counts its invocations.
#[derive(Clone, Default)]
pub struct CountingHook {
    calls: Arc<AtomicUsize>,
}

impl CountingHook {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CleanupHook for CountingHook {
    fn after_request(&self) -> Result<(), WorkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Health events recorded by [`RecordingHealthReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ResourcesLoaded(usize),
    WorkerStarted(usize),
    HelperStarted(u32),
    HelperStopped(u32),
    HelperFailed(String),
}

/// Records health events for assertions.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn resources_loaded(&self, lexicons: &LexiconSet) {
        self.record(HealthEvent::ResourcesLoaded(lexicons.len()));
    }

    fn worker_started(&self, index: usize, _pid: u32) {
        self.record(HealthEvent::WorkerStarted(index));
    }

    fn helper_started(&self, _id: &str, pid: u32) {
        self.record(HealthEvent::HelperStarted(pid));
    }

    fn helper_stopped(&self, _id: &str, pid: u32) {
        self.record(HealthEvent::HelperStopped(pid));
    }

    fn helper_failed(&self, _id: &str, error: &SubprocessError) {
        self.record(HealthEvent::HelperFailed(error.to_string()));
    }
}

/// Work identifiers registered in the scenario world.
pub const RECORD: &str = "test.record";
pub const FAIL: &str = "test.fail";
pub const HELPER: &str = "test.helper";
pub const SECOND_HELPER: &str = "test.second";

/// Pid offset of the second helper's launcher.
pub const SECOND_HELPER_PIDS: u32 = 100;

/// Scenario world shared across worker BDD steps.
pub struct TestWorld {
    pub caller: TempDir,
    pub handler: RecordingHandler,
    pub cleanup: CountingHook,
    pub launcher: RecordingLauncher,
    pub second_launcher: RecordingLauncher,
    pub reporter: Arc<RecordingHealthReporter>,
    pub policy: RestartPolicy,
    pub verbose: bool,
    pub replies: Vec<String>,
    pub cwd_before: PathBuf,
    pub cwd_after: Vec<PathBuf>,
    supervisors: Vec<(&'static str, SharedSupervisor<RecordingLauncher>)>,
    worker: Option<Worker>,
    _cwd: MutexGuard<'static, ()>,
}

impl TestWorld {
    /// Builds a world holding the working-directory lock for its lifetime.
    pub fn new() -> Self {
        let cwd = lock_cwd();
        Self {
            caller: tempfile::tempdir().expect("caller dir"),
            handler: RecordingHandler::default(),
            cleanup: CountingHook::default(),
            launcher: RecordingLauncher::default(),
            second_launcher: RecordingLauncher::with_pid_offset(SECOND_HELPER_PIDS),
            reporter: Arc::new(RecordingHealthReporter::default()),
            policy: RestartPolicy::EveryRequest,
            verbose: false,
            replies: Vec::new(),
            cwd_before: env::current_dir().expect("cwd"),
            cwd_after: Vec::new(),
            supervisors: Vec::new(),
            worker: None,
            _cwd: cwd,
        }
    }

    /// Caller directory as a request field.
    pub fn caller_dir(&self) -> String {
        self.caller
            .path()
            .to_str()
            .expect("utf8 caller dir")
            .to_owned()
    }

    /// Writes a file into the caller directory.
    pub fn write_file(&self, name: &str, contents: &str) {
        fs::write(self.caller.path().join(name), contents).expect("write caller file");
    }

    /// Reads a file from the caller directory.
    pub fn read_file(&self, name: &str) -> String {
        fs::read_to_string(self.caller.path().join(name)).expect("read caller file")
    }

    /// Builds the worker on first use.
    pub fn worker(&mut self) -> &Worker {
        if self.worker.is_none() {
            let worker = self.build_worker();
            self.worker = Some(worker);
        }
        self.worker.as_ref().expect("worker built")
    }

    /// Sends a request and records the reply and the working directory.
    pub fn send(&mut self, fields: &[&str]) {
        let reply = send_request(self.worker(), fields);
        self.replies.push(reply);
        self.cwd_after.push(env::current_dir().expect("cwd"));
    }

    /// Lifecycle state of the helper registered under `id`.
    pub fn helper_state(&self, id: &str) -> SubprocessState {
        self.supervisors
            .iter()
            .find(|(registered, _)| *registered == id)
            .map_or(SubprocessState::Unstarted, |(_, supervisor)| {
                supervisor
                    .with_supervisor(|s| s.state())
                    .expect("supervisor lock")
            })
    }

    /// The most recent reply.
    pub fn last_reply(&self) -> &str {
        self.replies.last().map_or("", String::as_str)
    }

    fn build_worker(&mut self) -> Worker {
        let mut table = DispatchTable::new();
        table.register_work(RECORD, self.handler.clone());
        table.register_cleanup(RECORD, self.cleanup.clone());
        table.register_work(FAIL, FailingHandler);
        table.register_cleanup(FAIL, self.cleanup.clone());

        let helpers = [
            (HELPER, self.launcher.clone()),
            (SECOND_HELPER, self.second_launcher.clone()),
        ];
        for (id, launcher) in helpers {
            let reporter: Arc<dyn HealthReporter> = self.reporter.clone();
            let supervisor =
                SharedSupervisor::new(Supervisor::new(id, launcher, self.policy, reporter));
            table.register_work(id, HelperPipe::new(supervisor.clone()));
            table.register_cleanup(id, supervisor.clone());
            self.supervisors.push((id, supervisor));
        }

        Worker::new(0, table, ExternalRunner::default(), self.verbose)
    }
}

/// Fixture constructor shared by the behaviour suites.
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
