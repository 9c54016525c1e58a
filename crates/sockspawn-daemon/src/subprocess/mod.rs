//! Child process management: spawning, reaping, hang-up broadcast.

pub mod host;
pub mod reaper;
pub mod spawner;

use std::os::fd::OwnedFd;

use nix::unistd::Pid;

pub use host::ChildProcesses;
pub use reaper::{Reaper, Termination};
pub use spawner::{ChildSpawner, SpawnError};

/// The operating-system side of the supervision loop.
///
/// Children are independent once started; the loop only needs to create
/// them, learn how many have exited, and ask them to hang up.
#[allow(async_fn_in_trait)]
pub trait ChildHost {
    /// Start one child bound to `stdio`.
    fn spawn(&mut self, stdio: OwnedFd) -> Result<Pid, SpawnError>;

    /// Collect already-exited children without blocking; returns how many.
    fn reap_exited(&mut self) -> usize;

    /// Resolve when a child may have exited.
    async fn child_exited(&mut self);

    /// Ask every descendant to terminate. Does not wait for them.
    fn hang_up(&mut self);
}
