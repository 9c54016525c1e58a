//! [`ChildHost`] backed by real processes.

use std::collections::HashSet;
use std::io;
use std::os::fd::OwnedFd;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::{Pid, getpgrp};
use sockspawn_core::HangupScope;
use tracing::{info, warn};

use super::reaper::Reaper;
use super::spawner::{ChildSpawner, SpawnError};
use super::ChildHost;

/// Spawns the configured program and tracks which children are alive.
#[derive(Debug)]
pub struct ChildProcesses {
    spawner: ChildSpawner,
    reaper: Reaper,
    scope: HangupScope,
    live: HashSet<Pid>,
}

impl ChildProcesses {
    /// Needs a running runtime for the `SIGCHLD` subscription.
    pub fn new(spawner: ChildSpawner, scope: HangupScope) -> io::Result<Self> {
        Ok(Self {
            spawner,
            reaper: Reaper::new()?,
            scope,
            live: HashSet::new(),
        })
    }
}

impl ChildHost for ChildProcesses {
    fn spawn(&mut self, stdio: OwnedFd) -> Result<Pid, SpawnError> {
        let pid = self.spawner.spawn(stdio)?;
        self.live.insert(pid);
        Ok(pid)
    }

    fn reap_exited(&mut self) -> usize {
        self.reaper
            .sweep()
            .into_iter()
            .filter(|pid| self.live.remove(pid))
            .count()
    }

    async fn child_exited(&mut self) {
        self.reaper.child_exited().await;
    }

    fn hang_up(&mut self) {
        match self.scope {
            HangupScope::ProcessGroup => {
                let group = getpgrp();
                info!(pgrp = group.as_raw(), "Sending SIGHUP to process group");
                if let Err(e) = killpg(group, Signal::SIGHUP) {
                    warn!(pgrp = group.as_raw(), error = %e, "killpg failed");
                }
            }
            HangupScope::Children => {
                info!(children = self.live.len(), "Sending SIGHUP to children");
                for pid in &self.live {
                    match kill(*pid, Signal::SIGHUP) {
                        Ok(()) | Err(Errno::ESRCH) => {}
                        Err(e) => warn!(pid = pid.as_raw(), error = %e, "kill failed"),
                    }
                }
            }
        }
    }
}
