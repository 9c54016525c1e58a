//! Child process creation.
//!
//! Uses `std::process::Command`, which forks and execs without ever running
//! supervisor code in the child: a failed descriptor setup or exec is
//! reported back to the parent as an error and the child image is discarded.

use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::unistd::Pid;
use sockspawn_core::config::ChildCommand;
use thiserror::Error;
use tracing::debug;

/// Errors from launching a child.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("could not duplicate connection descriptor: {0}")]
    Descriptor(io::Error),

    #[error("fork failed: {0}")]
    Exhausted(io::Error),

    #[error("execv {} failed: {error}", program.display())]
    Exec {
        program: PathBuf,
        error: io::Error,
    },
}

impl SpawnError {
    /// Resource exhaustion is usually transient and worth a short backoff.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
}

/// Launches the configured program with a descriptor bound to its stdio.
#[derive(Debug, Clone)]
pub struct ChildSpawner {
    command: ChildCommand,
}

impl ChildSpawner {
    pub const fn new(command: ChildCommand) -> Self {
        Self { command }
    }

    /// Start one child with `stdio` as its stdin, stdout and stderr.
    ///
    /// The environment is inherited. The returned process is not waited on
    /// here; it is collected by the reaper's sweep.
    pub fn spawn(&self, stdio: OwnedFd) -> Result<Pid, SpawnError> {
        let stdout = stdio.try_clone().map_err(SpawnError::Descriptor)?;
        let stderr = stdio.try_clone().map_err(SpawnError::Descriptor)?;

        let mut cmd = Command::new(&self.command.program);
        if let Some((arg0, args)) = self.command.argv.split_first() {
            cmd.arg0(arg0).args(args);
        }
        cmd.stdin(Stdio::from(stdio))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        debug!(program = %self.command.program.display(), "Starting child");
        let child = cmd.spawn().map_err(|e| self.classify(e))?;

        #[allow(clippy::cast_possible_wrap)]
        let pid = Pid::from_raw(child.id() as i32);
        Ok(pid)
    }

    fn classify(&self, err: io::Error) -> SpawnError {
        match err.raw_os_error().map(Errno::from_raw) {
            Some(Errno::EAGAIN | Errno::ENOMEM | Errno::EMFILE | Errno::ENFILE) => {
                SpawnError::Exhausted(err)
            }
            _ => SpawnError::Exec {
                program: self.command.program.clone(),
                error: err,
            },
        }
    }
}
