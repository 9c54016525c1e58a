//! The supervision loop.
//!
//! Every iteration runs the same fixed sequence:
//!
//! 1. shutdown requested: hang up descendants, stop;
//! 2. listener no longer ours: stop, leaving children alone;
//! 3. at capacity: wait (bounded) for a child to exit, reap, start over;
//! 4. reap already-exited children without blocking;
//! 5. wait (bounded) for listener activity;
//! 6. dispatch a child for it.
//!
//! Every wait is bounded by `check_interval` and also ends early on a
//! shutdown request, so steps 1 and 2 are revisited promptly even when the
//! supervisor is saturated or idle.

mod limits;


pub use limits::Limits;

use tracing::{debug, error, info};

use crate::shutdown::ShutdownSignal;
use crate::socket::{Activity, ActivitySource, IdentityMonitor};
use crate::subprocess::ChildHost;

/// Why the loop stopped. Both are graceful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// `SIGHUP`/`SIGTERM` received.
    Shutdown,
    /// The socket file was removed or replaced.
    ListenerLost,
}

/// Single-owner supervision state and the loop driving it.
pub struct Supervisor<S, C> {
    limits: Limits,
    source: S,
    children: C,
    monitor: IdentityMonitor,
    shutdown: ShutdownSignal,
    active: usize,
}

impl<S: ActivitySource, C: ChildHost> Supervisor<S, C> {
    pub const fn new(
        limits: Limits,
        source: S,
        children: C,
        monitor: IdentityMonitor,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            limits,
            source,
            children,
            monitor,
            shutdown,
            active: 0,
        }
    }

    /// Children spawned and not yet reaped.
    pub const fn active(&self) -> usize {
        self.active
    }

    /// Run until shutdown or loss of the listener.
    pub async fn run(&mut self) -> ExitReason {
        info!(
            path = %self.monitor.path().display(),
            max_children = self.limits.max_children,
            "Supervising"
        );
        let reason = loop {
            if let Some(reason) = self.step().await {
                break reason;
            }
        };
        info!(?reason, active = self.active, "Supervision stopped");
        reason
    }

    async fn step(&mut self) -> Option<ExitReason> {
        if self.shutdown.is_requested() {
            info!(active = self.active, "Shutdown requested");
            self.children.hang_up();
            return Some(ExitReason::Shutdown);
        }

        if !self.monitor.is_listener_still_mine() {
            return Some(ExitReason::ListenerLost);
        }

        if self.active >= self.limits.max_children {
            self.wait_for_exit().await;
            return None;
        }

        self.reap();

        if let Some(activity) = self.wait_for_activity().await {
            self.dispatch(activity).await;
        }
        None
    }

    async fn wait_for_exit(&mut self) {
        debug!(active = self.active, "At capacity, waiting for a child to exit");
        tokio::select! {
            () = self.children.child_exited() => {}
            () = self.shutdown.requested() => {}
            () = tokio::time::sleep(self.limits.check_interval) => {}
        }
        self.reap();
    }

    fn reap(&mut self) {
        let reaped = self.children.reap_exited();
        if reaped > 0 {
            self.active = self.active.saturating_sub(reaped);
            debug!(reaped, active = self.active, "Reaped children");
        }
    }

    async fn wait_for_activity(&mut self) -> Option<Activity> {
        tokio::select! {
            result = self.source.next_activity() => match result {
                Ok(activity) => Some(activity),
                Err(e) => {
                    debug!(error = %e, "Waiting for activity failed");
                    None
                }
            },
            () = self.shutdown.requested() => None,
            () = tokio::time::sleep(self.limits.check_interval) => None,
        }
    }

    async fn dispatch(&mut self, activity: Activity) {
        debug_assert!(self.active < self.limits.max_children);
        let kind = activity.kind();
        match self.children.spawn(activity.into_stdio()) {
            Ok(pid) => {
                self.active += 1;
                debug!(pid = pid.as_raw(), kind, active = self.active, "Child spawned");
            }
            Err(e) if e.is_transient() => {
                error!(error = %e, backoff = ?self.limits.spawn_backoff, "Could not create child");
                tokio::select! {
                    () = self.shutdown.requested() => {}
                    () = tokio::time::sleep(self.limits.spawn_backoff) => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Could not start child");
            }
        }
    }
}
