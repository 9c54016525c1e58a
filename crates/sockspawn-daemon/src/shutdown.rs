//! Shutdown coordination.
//!
//! `SIGHUP` and `SIGTERM` only flip a watch channel to `true`. Everything
//! that reacts to it (hang-up broadcast, logging, closing the listener)
//! happens in the supervision loop.

use std::io;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Read side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Write side of the shutdown flag. Set-only.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Create a connected trigger/signal pair.
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Route `SIGHUP` and `SIGTERM` into a [`ShutdownSignal`].
///
/// The signal handlers stay installed for the life of the process, so a
/// hang-up the supervisor later broadcasts to its own process group does
/// not kill it.
pub fn install() -> io::Result<ShutdownSignal> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let (trigger, shutdown) = channel();

    tokio::spawn(async move {
        tokio::select! {
            _ = hangup.recv() => {}
            _ = terminate.recv() => {}
        }
        trigger.request();
    });

    Ok(shutdown)
}

impl ShutdownTrigger {
    pub fn request(&self) {
        self.tx.send_replace(true);
    }
}

impl ShutdownSignal {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|&requested| requested).await.is_err() {
            // Trigger dropped without requesting: never fires.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_unrequested() {
        let (_trigger, mut shutdown) = channel();
        assert!(!shutdown.is_requested());
        let waited = tokio::time::timeout(Duration::from_millis(20), shutdown.requested()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn request_is_observed() {
        let (trigger, mut shutdown) = channel();
        trigger.request();
        assert!(shutdown.is_requested());
        tokio::time::timeout(Duration::from_millis(100), shutdown.requested())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn request_survives_trigger_drop() {
        let (trigger, mut shutdown) = channel();
        trigger.request();
        drop(trigger);
        assert!(shutdown.is_requested());
        tokio::time::timeout(Duration::from_millis(100), shutdown.requested())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_trigger_never_fires() {
        let (trigger, mut shutdown) = channel();
        drop(trigger);
        let waited = tokio::time::timeout(Duration::from_millis(20), shutdown.requested()).await;
        assert!(waited.is_err());
        assert!(!shutdown.is_requested());
    }

    #[tokio::test]
    async fn requested_wakes_a_waiter() {
        let (trigger, mut shutdown) = channel();
        let waiter = async {
            shutdown.requested().await;
        };
        let requester = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.request();
        };
        tokio::time::timeout(Duration::from_secs(1), async { tokio::join!(waiter, requester) })
            .await
            .unwrap();
    }
}
