//! Collecting exited children.

use std::fmt;
use std::io;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tokio::signal::unix::{Signal as SignalStream, SignalKind, signal};
use tracing::{debug, warn};

/// How a reaped child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(Signal),
    Other,
}

impl From<WaitStatus> for Termination {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => Self::Exited(code),
            WaitStatus::Signaled(_, signal, _) => Self::Signaled(signal),
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
            Self::Other => f.write_str("stopped or continued"),
        }
    }
}

/// Reaps any child of this process and wakes on `SIGCHLD`.
#[derive(Debug)]
pub struct Reaper {
    sigchld: SignalStream,
}

impl Reaper {
    /// Subscribe to child-exit notifications. Needs a running runtime.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            sigchld: signal(SignalKind::child())?,
        })
    }

    /// Collect every child that has already exited, without blocking.
    pub fn sweep(&mut self) -> Vec<Pid> {
        sweep_exited()
    }

    /// Resolve on the next child-exit notification.
    ///
    /// The notification is coalesced: several exits may produce one wakeup,
    /// so callers follow up with [`sweep`](Self::sweep).
    pub async fn child_exited(&mut self) {
        if self.sigchld.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// `waitpid(-1, WNOHANG)` until nothing is left to collect.
pub fn sweep_exited() -> Vec<Pid> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => {
                if let Some(pid) = status.pid() {
                    debug!(pid = pid.as_raw(), outcome = %Termination::from(status), "Child reaped");
                    reaped.push(pid);
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => {
                warn!(error = %e, "waitpid failed");
                break;
            }
        }
    }
    reaped
}
