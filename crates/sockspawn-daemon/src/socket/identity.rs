//! Listener identity tracking.
//!
//! The (device, inode) pair of the socket file is recorded once at
//! provisioning time. If another actor removes or replaces the file, clients
//! can no longer reach this supervisor under the advertised name and it must
//! stop serving.

use std::fmt;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::error;

/// Durable identity of a file on its filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl ListenerIdentity {
    /// Stat `path` and return its identity.
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

impl fmt::Display for ListenerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.dev, self.ino)
    }
}

/// Why the listener is no longer ours.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("stat(\"{}\") failed: {error}", path.display())]
    Missing {
        path: PathBuf,
        error: io::Error,
    },

    #[error("socket has changed: {found} != {expected}")]
    Changed {
        expected: ListenerIdentity,
        found: ListenerIdentity,
    },
}

/// Compares the file currently at the socket path with the recorded identity.
#[derive(Debug, Clone)]
pub struct IdentityMonitor {
    path: PathBuf,
    identity: ListenerIdentity,
}

impl IdentityMonitor {
    pub const fn new(path: PathBuf, identity: ListenerIdentity) -> Self {
        Self { path, identity }
    }

    /// Record the identity of whatever is at `path` right now.
    pub fn capture(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let identity = ListenerIdentity::of(&path)?;
        Ok(Self { path, identity })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn identity(&self) -> ListenerIdentity {
        self.identity
    }

    /// Re-stat the path and compare.
    pub fn verify(&self) -> Result<(), IdentityError> {
        let found = ListenerIdentity::of(&self.path).map_err(|error| IdentityError::Missing {
            path: self.path.clone(),
            error,
        })?;
        if found == self.identity {
            Ok(())
        } else {
            Err(IdentityError::Changed {
                expected: self.identity,
                found,
            })
        }
    }

    /// Like [`verify`](Self::verify), logging the reason on failure.
    pub fn is_listener_still_mine(&self) -> bool {
        match self.verify() {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Listener is no longer ours");
                false
            }
        }
    }
}
