//! Integration tests for the `catapultd` binary.
//!
//! Each test starts a real daemon on a socket inside a temporary directory
//! and talks to it over the wire protocol.

use std::ffi::OsString;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::cargo::{cargo_bin, cargo_bin_cmd};
use catapultd::protocol;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use predicates::str::contains;
use tempfile::TempDir;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKET: &str = "run/catapult.sock";

struct RunningDaemon {
    child: Child,
    socket: PathBuf,
    root: TempDir,
}

impl RunningDaemon {
    fn start(workers: &str) -> Self {
        let root = tempfile::tempdir().expect("temp root");
        let socket = root.path().join(SOCKET);
        Self::launch(root, socket.clone().into_os_string(), socket, workers)
    }

    /// Starts a daemon configured with a socket path relative to its root.
    fn start_relative(workers: &str) -> Self {
        let root = tempfile::tempdir().expect("temp root");
        let socket = root.path().join(SOCKET);
        Self::launch(root, OsString::from(SOCKET), socket, workers)
    }

    fn launch(root: TempDir, setting: OsString, socket: PathBuf, workers: &str) -> Self {
        let child = Command::new(cargo_bin!("catapultd"))
            .current_dir(root.path())
            .env("CATAPULT_SOCKET_PATH", setting)
            .env("CATAPULT_WORKERS", workers)
            .env("CATAPULT_LOG_FILTER", "catapultd=debug")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        let daemon = Self {
            child,
            socket,
            root,
        };
        daemon.wait_until_ready();
        daemon
    }

    fn caller_dir(&self) -> &str {
        self.root.path().to_str().expect("utf8 temp root")
    }

    fn wait_until_ready(&self) {
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(mut stream) = UnixStream::connect(&self.socket) {
                let reply = exchange(&mut stream, &[self.caller_dir(), protocol::PING]);
                if reply == protocol::PONG {
                    return;
                }
            }
            thread::sleep(Duration::from_millis(50));
        }
        panic!("daemon did not answer on {}", self.socket.display());
    }

    fn request(&self, fields: &[&str]) -> String {
        let mut stream = UnixStream::connect(&self.socket).expect("connect to daemon");
        exchange(&mut stream, fields)
    }

    fn write_script(&self, name: &str, body: &str) {
        let path = self.root.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    }

    fn stop(&mut self) -> ExitStatus {
        let pid = Pid::from_raw(i32::try_from(self.child.id()).expect("pid fits"));
        kill(pid, Signal::SIGTERM).expect("signal daemon");
        self.child.wait().expect("wait for daemon")
    }
}

impl Drop for RunningDaemon {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            self.child.kill().ok();
            self.child.wait().ok();
        }
    }
}

fn exchange(stream: &mut UnixStream, fields: &[&str]) -> String {
    stream
        .write_all(&protocol::encode(fields))
        .expect("send request");
    let mut reply = String::new();
    stream.read_to_string(&mut reply).expect("read reply");
    reply
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[test]
fn occupied_socket_path_fails_startup() {
    let root = tempfile::tempdir().expect("temp root");
    let socket = root.path().join("catapult.sock");
    fs::write(&socket, "occupant").expect("write occupant");

    let mut command = cargo_bin_cmd!("catapultd");
    command
        .current_dir(root.path())
        .env("CATAPULT_SOCKET_PATH", &socket)
        .assert()
        .failure()
        .stderr(contains("already exists"));

    assert_eq!(fs::read_to_string(&socket).expect("occupant"), "occupant");
}

#[test]
fn missing_socket_path_fails_startup() {
    let root = tempfile::tempdir().expect("temp root");
    let mut command = cargo_bin_cmd!("catapultd");
    command
        .current_dir(root.path())
        .env_remove("CATAPULT_SOCKET_PATH")
        .assert()
        .failure()
        .stderr(contains("socket path is required"));
}

#[test]
fn ping_is_answered_and_shutdown_removes_the_socket() {
    let mut daemon = RunningDaemon::start("2");
    assert_eq!(
        daemon.request(&[daemon.caller_dir(), protocol::PING]),
        protocol::PONG
    );

    let socket = daemon.socket.clone();
    let status = daemon.stop();
    assert!(status.success(), "daemon exited with {status}");
    assert!(!exists(&socket), "socket should be removed on shutdown");
}

#[test]
fn shutdown_during_a_request_removes_the_socket_not_a_namesake() {
    let mut daemon = RunningDaemon::start_relative("1");
    let client = daemon.root.path().join("client");
    let namesake = client.join(SOCKET);
    fs::create_dir_all(namesake.parent().expect("namesake parent")).expect("client dirs");
    fs::write(&namesake, "not the daemon socket").expect("write namesake");
    let script = client.join("slow.sh");
    fs::write(&script, "#!/bin/sh\nsleep 2\n").expect("write script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod script");

    let socket = daemon.socket.clone();
    let client_dir = client.to_str().expect("utf8 client dir").to_owned();
    let pending = {
        let socket = socket.clone();
        thread::spawn(move || {
            let mut stream = UnixStream::connect(&socket).expect("connect to daemon");
            exchange(&mut stream, &[client_dir.as_str(), "./slow.sh"])
        })
    };
    // Let the only worker enter the client directory.
    thread::sleep(Duration::from_millis(500));

    let status = daemon.stop();
    assert!(status.success(), "daemon exited with {status}");
    pending.join().expect("request thread");
    assert!(!exists(&socket), "socket should be removed on shutdown");
    assert!(exists(&namesake), "file in the caller directory was removed");
}

#[test]
fn unknown_script_does_not_break_the_next_request() {
    let daemon = RunningDaemon::start("1");
    daemon.write_script("touch.sh", "touch touched");

    let missing = daemon.request(&[daemon.caller_dir(), "./missing.sh"]);
    assert_eq!(missing, "no such file or module: ./missing.sh\n");

    let reply = daemon.request(&[daemon.caller_dir(), "./touch.sh"]);
    assert_eq!(reply, "");
    assert!(daemon.root.path().join("touched").exists());
}

#[test]
fn unhandled_requests_are_answered() {
    let daemon = RunningDaemon::start("1");
    assert_eq!(daemon.request(&["lonely"]), "Cannot handle lonely\n");
}

#[test]
fn workers_serve_requests_concurrently() {
    let daemon = RunningDaemon::start("3");
    daemon.write_script("slow.sh", "sleep 1");

    let started = Instant::now();
    thread::scope(|scope| {
        let requests: Vec<_> = (0..3)
            .map(|_| scope.spawn(|| daemon.request(&[daemon.caller_dir(), "./slow.sh"])))
            .collect();
        for request in requests {
            assert_eq!(request.join().expect("request thread"), "");
        }
    });
    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_millis(2500),
        "three one-second requests took {elapsed:?}"
    );
}

#[test]
fn a_fourth_request_waits_for_a_free_worker() {
    let daemon = RunningDaemon::start("3");
    daemon.write_script("slow.sh", "sleep 1");

    let started = Instant::now();
    thread::scope(|scope| {
        let requests: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| daemon.request(&[daemon.caller_dir(), "./slow.sh"])))
            .collect();
        for request in requests {
            assert_eq!(request.join().expect("request thread"), "");
        }
    });
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(1900),
        "four requests on three workers finished in {elapsed:?}"
    );
}
