//! The `sockspawn` binary: startup, shutdown broadcast and exit codes.
//!
//! Each run gets its own process group so the group-wide hang-up stays
//! inside the test.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

const PATIENCE: Duration = Duration::from_secs(10);

/// A running `sockspawn` with its log on a pipe.
struct Daemon {
    child: Child,
    log: BufReader<ChildStderr>,
    seen: String,
}

impl Daemon {
    fn start(args: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_sockspawn"))
            .args(args)
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let log = BufReader::new(child.stderr.take().unwrap());
        Self {
            child,
            log,
            seen: String::new(),
        }
    }

    /// Block until a log line containing `needle` shows up.
    fn wait_for_log(&mut self, needle: &str) {
        loop {
            let mut line = String::new();
            let read = self.log.read_line(&mut line).unwrap();
            assert!(read > 0, "log ended before {needle:?}:\n{}", self.seen);
            self.seen.push_str(&line);
            if line.contains(needle) {
                return;
            }
        }
    }

    fn terminate(&self) {
        let pid = Pid::from_raw(i32::try_from(self.child.id()).unwrap());
        kill(pid, Signal::SIGTERM).unwrap();
    }

    /// Wait for exit; returns the status and the whole log.
    fn finish(mut self) -> (ExitStatus, String) {
        let deadline = Instant::now() + PATIENCE;
        let status = loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                break status;
            }
            if Instant::now() > deadline {
                let _ = self.child.kill();
                panic!("sockspawn did not exit:\n{}", self.seen);
            }
            std::thread::sleep(Duration::from_millis(20));
        };
        self.log.read_to_string(&mut self.seen).unwrap();
        (status, self.seen)
    }
}

fn wait_for_socket(path: &Path) {
    let deadline = Instant::now() + PATIENCE;
    while !std::fs::metadata(path).is_ok_and(|m| m.file_type().is_socket()) {
        assert!(Instant::now() < deadline, "socket never appeared");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn connect(path: &Path) -> UnixStream {
    let deadline = Instant::now() + PATIENCE;
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => {
                stream.set_read_timeout(Some(PATIENCE)).unwrap();
                return stream;
            }
            Err(e) => {
                assert!(Instant::now() < deadline, "could not connect: {e}");
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

#[test]
fn sigterm_hangs_up_the_group_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("echo.sock");
    let daemon = Daemon::start(&["-f", "--no-syslog", sock.to_str().unwrap(), "/bin/cat"]);

    let mut client = connect(&sock);
    client.write_all(b"hi\n").unwrap();
    let mut echoed = [0u8; 3];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"hi\n");

    daemon.terminate();
    let (status, log) = daemon.finish();
    assert_eq!(status.code(), Some(0), "{log}");
    assert!(log.contains("Sending SIGHUP to process group"), "{log}");

    // The cat child was hung up, so its end of the connection is closed.
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());
}

#[test]
fn removed_socket_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("lost.sock");
    let mut daemon = Daemon::start(&["-f", "--no-syslog", sock.to_str().unwrap(), "/bin/cat"]);

    daemon.wait_for_log("Supervising");
    wait_for_socket(&sock);
    std::fs::remove_file(&sock).unwrap();

    let (status, log) = daemon.finish();
    assert_eq!(status.code(), Some(0), "{log}");
    assert!(log.contains("Listener is no longer ours"), "{log}");
}

#[test]
fn unbindable_path_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("missing").join("s.sock");
    let daemon = Daemon::start(&["-f", "--no-syslog", sock.to_str().unwrap(), "/bin/cat"]);

    let (status, log) = daemon.finish();
    assert_eq!(status.code(), Some(1), "{log}");
    assert!(log.contains("bind "), "{log}");
    assert_eq!(log.matches("No such file or directory").count(), 1, "{log}");
}

#[test]
fn missing_command_exits_one() {
    let daemon = Daemon::start(&["-f", "--no-syslog", "/tmp/only-a-socket.sock"]);
    let (status, _) = daemon.finish();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn wait_mode_runs_a_single_child() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("wait.sock");
    let mut daemon = Daemon::start(&[
        "-f",
        "--no-syslog",
        "--log-json",
        "-w",
        "-N",
        "5",
        sock.to_str().unwrap(),
        "/bin/cat",
    ]);

    daemon.wait_for_log("Supervising");
    daemon.terminate();
    let (status, log) = daemon.finish();
    assert_eq!(status.code(), Some(0), "{log}");
    assert!(log.contains("wait mode allows a single child"), "{log}");
    assert!(log.contains("\"max_children\":1"), "{log}");
}
