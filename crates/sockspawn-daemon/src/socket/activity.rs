//! Listener activity: accepted connections or bare readiness.

use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixListener;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use sockspawn_core::DispatchMode;
use tokio::io::unix::AsyncFd;

/// One unit of work for the supervisor.
#[derive(Debug)]
pub enum Activity {
    /// An accepted connection.
    Connection(OwnedFd),
    /// The listener has pending connections; carries a duplicate of the
    /// listening socket for a child that accepts on its own.
    Ready(OwnedFd),
}

impl Activity {
    /// The descriptor to install as the child's stdin/stdout/stderr.
    pub fn into_stdio(self) -> OwnedFd {
        match self {
            Self::Connection(fd) | Self::Ready(fd) => fd,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Ready(_) => "ready",
        }
    }
}

/// Something the supervisor can wait on for new work.
#[allow(async_fn_in_trait)]
pub trait ActivitySource {
    /// Wait until there is something to dispatch.
    async fn next_activity(&mut self) -> io::Result<Activity>;
}

/// The provisioned listener, registered with the runtime.
#[derive(Debug)]
pub struct Endpoint {
    listener: AsyncFd<UnixListener>,
    mode: DispatchMode,
}

impl Endpoint {
    /// Register `listener` with the current runtime.
    ///
    /// Only connection mode switches the socket to non-blocking: in wait mode
    /// children inherit it and expect an ordinary blocking listener.
    pub fn new(listener: UnixListener, mode: DispatchMode) -> io::Result<Self> {
        if mode == DispatchMode::Connection {
            listener.set_nonblocking(true)?;
        }
        Ok(Self {
            listener: AsyncFd::new(listener)?,
            mode,
        })
    }

    async fn accept(&self) -> io::Result<Activity> {
        loop {
            let mut guard = self.listener.readable().await?;
            match guard.try_io(|inner| inner.get_ref().accept()) {
                Ok(Ok((stream, _addr))) => {
                    stream.set_nonblocking(false)?;
                    return Ok(Activity::Connection(OwnedFd::from(stream)));
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => {}
            }
        }
    }

    async fn readiness(&self) -> io::Result<Activity> {
        loop {
            // Level check first: queued connections left behind by a previous
            // child do not produce a fresh edge.
            if self.has_pending()? {
                let dup = self.listener.get_ref().as_fd().try_clone_to_owned()?;
                return Ok(Activity::Ready(dup));
            }
            let mut guard = self.listener.readable().await?;
            guard.clear_ready();
        }
    }

    fn has_pending(&self) -> io::Result<bool> {
        let mut fds = [PollFd::new(
            self.listener.get_ref().as_fd(),
            PollFlags::POLLIN,
        )];
        let ready = poll(&mut fds, PollTimeout::ZERO)?;
        Ok(ready > 0)
    }
}

impl ActivitySource for Endpoint {
    async fn next_activity(&mut self) -> io::Result<Activity> {
        match self.mode {
            DispatchMode::Connection => self.accept().await,
            DispatchMode::Wait => self.readiness().await,
        }
    }
}
