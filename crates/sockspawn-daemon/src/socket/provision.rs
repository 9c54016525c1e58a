//! Atomic creation of the listening socket.
//!
//! The socket is bound under a temporary name next to the configured path,
//! given its final mode and ownership, and only then renamed into place. A
//! listener already serving the configured path keeps answering until the
//! rename swaps the new one in.

use std::ffi::OsString;
use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use nix::sys::socket::{Backlog, listen};
use nix::sys::stat::{Mode, umask};
use nix::unistd::{Gid, Uid, chown};
use sockspawn_core::config::SocketConfig;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::identity::{IdentityMonitor, ListenerIdentity};

/// Suffix appended to the configured path for the temporary bind.
pub const TEMP_SUFFIX: &str = ".new";

/// Socket provisioning errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("bind {}: {error}", path.display())]
    Bind {
        path: PathBuf,
        error: io::Error,
    },

    #[error("chmod {}: {error}", path.display())]
    Permissions {
        path: PathBuf,
        error: io::Error,
    },

    #[error("chown {}: {error}", path.display())]
    Ownership {
        path: PathBuf,
        error: nix::Error,
    },

    #[error("can't stat {}: {error}", path.display())]
    Identity {
        path: PathBuf,
        error: io::Error,
    },

    #[error("rename {} -> {}: {error}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        error: io::Error,
    },

    #[error("listen on {}: {error}", path.display())]
    Listen {
        path: PathBuf,
        error: nix::Error,
    },
}

/// A listening socket published under its configured name.
#[derive(Debug)]
pub struct ProvisionedSocket {
    pub listener: UnixListener,
    pub monitor: IdentityMonitor,
}

/// Temporary bind path for `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Create, protect, publish and start listening on the socket.
pub fn provision(socket: &SocketConfig) -> Result<ProvisionedSocket, ProvisionError> {
    let tmp = temp_path(&socket.path);
    debug!(path = %socket.path.display(), tmp = %tmp.display(), "Provisioning socket");

    remove_stale(&tmp)?;
    let listener = bind_restricted(&tmp)?;

    let identity = match prepare(&tmp, socket) {
        Ok(identity) => identity,
        Err(e) => {
            discard(&tmp);
            return Err(e);
        }
    };

    if let Err(error) = std::fs::rename(&tmp, &socket.path) {
        discard(&tmp);
        return Err(ProvisionError::Rename {
            from: tmp,
            to: socket.path.clone(),
            error,
        });
    }

    let backlog = Backlog::new(socket.backlog).and_then(|b| listen(&listener, b));
    if let Err(error) = backlog {
        discard(&socket.path);
        return Err(ProvisionError::Listen {
            path: socket.path.clone(),
            error,
        });
    }

    info!(
        path = %socket.path.display(),
        %identity,
        mode = format_args!("{:o}", socket.mode),
        backlog = socket.backlog,
        "Listening"
    );

    Ok(ProvisionedSocket {
        listener,
        monitor: IdentityMonitor::new(socket.path.clone(), identity),
    })
}

/// A temp socket left behind by a crashed run would make the bind fail.
fn remove_stale(tmp: &Path) -> Result<(), ProvisionError> {
    match std::fs::remove_file(tmp) {
        Ok(()) => {
            warn!(tmp = %tmp.display(), "Removed stale temporary socket");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(ProvisionError::Bind {
            path: tmp.to_path_buf(),
            error,
        }),
    }
}

/// Bind with group/other bits masked until the configured mode is applied.
fn bind_restricted(tmp: &Path) -> Result<UnixListener, ProvisionError> {
    let old_mask = umask(Mode::S_IRWXG | Mode::S_IRWXO);
    let bound = UnixListener::bind(tmp);
    umask(old_mask);
    bound.map_err(|error| ProvisionError::Bind {
        path: tmp.to_path_buf(),
        error,
    })
}

fn prepare(tmp: &Path, socket: &SocketConfig) -> Result<ListenerIdentity, ProvisionError> {
    std::fs::set_permissions(tmp, Permissions::from_mode(socket.mode)).map_err(|error| {
        ProvisionError::Permissions {
            path: tmp.to_path_buf(),
            error,
        }
    })?;

    if socket.owner.is_some() || socket.group.is_some() {
        chown(
            tmp,
            socket.owner.map(Uid::from_raw),
            socket.group.map(Gid::from_raw),
        )
        .map_err(|error| ProvisionError::Ownership {
            path: tmp.to_path_buf(),
            error,
        })?;
    }

    // Identity must come from the bound file itself; rename keeps the inode.
    ListenerIdentity::of(tmp).map_err(|error| ProvisionError::Identity {
        path: tmp.to_path_buf(),
        error,
    })
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove socket file");
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::os::unix::fs::{FileTypeExt, MetadataExt};
    use std::os::unix::net::UnixStream;

    fn socket_config(path: PathBuf) -> SocketConfig {
        SocketConfig {
            path,
            mode: 0o666,
            owner: None,
            group: None,
            backlog: 15,
        }
    }

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/run/echo.sock")),
            PathBuf::from("/run/echo.sock.new")
        );
    }

    #[test]
    fn provisioned_socket_has_mode_and_identity() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("svc.sock");
        let mut config = socket_config(path.clone());
        config.mode = 0o640;

        let provisioned = provision(&config).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_socket());
        assert_eq!(meta.mode() & 0o7777, 0o640);
        assert_eq!(
            ListenerIdentity::of(&path).unwrap(),
            provisioned.monitor.identity()
        );
        assert!(provisioned.monitor.verify().is_ok());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn provisioned_socket_accepts_connections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("svc.sock");
        let provisioned = provision(&socket_config(path.clone())).unwrap();

        let _client = UnixStream::connect(&path).unwrap();
        let (_server, _) = provisioned.listener.accept().unwrap();
    }

    #[test]
    fn replaces_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("svc.sock");
        std::fs::write(&path, b"not a socket").unwrap();

        provision(&socket_config(path.clone())).unwrap();

        assert!(std::fs::metadata(&path).unwrap().file_type().is_socket());
    }

    #[test]
    fn replaces_previous_listener() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("svc.sock");
        let first = provision(&socket_config(path.clone())).unwrap();
        let second = provision(&socket_config(path.clone())).unwrap();

        assert!(!first.monitor.is_listener_still_mine());
        assert!(second.monitor.is_listener_still_mine());
    }

    #[test]
    fn stale_temp_file_is_cleared() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("svc.sock");
        std::fs::write(temp_path(&path), b"leftover").unwrap();

        provision(&socket_config(path.clone())).unwrap();
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn missing_directory_fails_bind() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nope").join("svc.sock");

        let err = provision(&socket_config(path.clone())).unwrap_err();
        assert!(matches!(err, ProvisionError::Bind { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn bind_error_reports_the_os_error_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nope").join("svc.sock");

        let err = provision(&socket_config(path)).unwrap_err();
        let chain = format!("{:#}", anyhow::Error::from(err));
        assert!(chain.starts_with("bind "));
        assert_eq!(chain.matches("No such file or directory").count(), 1);
    }

    #[test]
    fn chown_to_self_succeeds() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("svc.sock");
        let mut config = socket_config(path.clone());
        config.owner = Some(nix::unistd::getuid().as_raw());
        config.group = Some(nix::unistd::getgid().as_raw());

        provision(&config).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.uid(), nix::unistd::getuid().as_raw());
        assert_eq!(meta.gid(), nix::unistd::getgid().as_raw());
    }

    #[test]
    fn failed_chown_leaves_nothing_behind() {
        if nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("svc.sock");
        let mut config = socket_config(path.clone());
        config.owner = Some(0);

        let err = provision(&config).unwrap_err();
        assert!(matches!(err, ProvisionError::Ownership { .. }));
        assert!(!path.exists());
        assert!(!temp_path(&path).exists());
    }
}
