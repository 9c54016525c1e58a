//! Configuration record for sockspawn.
//!
//! The daemon binary turns its command line into a [`ConfigBuilder`]; once
//! [`ConfigBuilder::build`] validates it, the resulting [`Config`] is never
//! mutated again.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use nix::unistd::{Group, User};
use tracing::warn;

use crate::error::{Error, Result};

/// Default cap on concurrently running children.
pub const DEFAULT_MAX_CHILDREN: usize = 30;

/// Default permission bits for the socket file (world read/write).
pub const DEFAULT_SOCKET_MODE: u32 = 0o666;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 15;

/// Default upper bound on any single blocking wait in the supervision loop.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Default delay after a child could not be created for lack of resources.
pub const DEFAULT_SPAWN_BACKOFF: Duration = Duration::from_secs(1);

const MAX_SOCKET_MODE: u32 = 0o7777;

/// How the supervisor turns listener activity into children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Accept each connection and hand it to a fresh child.
    #[default]
    Connection,
    /// Wait for the listener to become readable and hand the listener itself
    /// to a single child, which accepts on its own.
    Wait,
}

/// Which processes receive the hang-up broadcast on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HangupScope {
    /// The supervisor's whole process group.
    #[default]
    ProcessGroup,
    /// Only live children spawned by this supervisor.
    Children,
}

impl FromStr for HangupScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "group" => Ok(Self::ProcessGroup),
            "children" => Ok(Self::Children),
            other => Err(Error::Config(format!(
                "invalid hang-up scope \"{other}\" (expected \"group\" or \"children\")"
            ))),
        }
    }
}

/// Listening socket settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// Absolute path the socket is published under.
    pub path: PathBuf,
    /// Permission bits applied before the socket becomes visible.
    pub mode: u32,
    /// Owner uid, `None` leaves it unchanged.
    pub owner: Option<u32>,
    /// Group gid, `None` leaves it unchanged.
    pub group: Option<u32>,
    /// Listen backlog.
    pub backlog: i32,
}

/// The program run for every dispatched child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    /// Absolute path executed.
    pub program: PathBuf,
    /// Full argument vector; `argv[0]` is the program token as given.
    pub argv: Vec<OsString>,
}

impl ChildCommand {
    /// Build from the trailing command-line tokens (`program [args...]`).
    pub fn from_tokens(tokens: Vec<OsString>) -> Result<Self> {
        let Some(first) = tokens.first() else {
            return Err(Error::Config("no child program given".to_string()));
        };
        if first.is_empty() {
            return Err(Error::Config("child program path is empty".to_string()));
        }
        let program = absolutize(Path::new(first))?;
        Ok(Self {
            program,
            argv: tokens,
        })
    }
}

/// Loop timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Upper bound on any blocking wait before shutdown/identity are rechecked.
    pub check_interval: Duration,
    /// Pause after a spawn failed for lack of resources.
    pub spawn_backoff: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            spawn_backoff: DEFAULT_SPAWN_BACKOFF,
        }
    }
}

/// Validated, immutable supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub socket: SocketConfig,
    pub command: ChildCommand,
    pub dispatch: DispatchMode,
    pub max_children: usize,
    pub daemonize: bool,
    pub hangup_scope: HangupScope,
    pub timing: Timing,
}

impl Config {
    /// Start building a configuration for `socket_path` running `command`.
    pub fn builder(socket_path: impl Into<PathBuf>, command: Vec<OsString>) -> ConfigBuilder {
        ConfigBuilder {
            socket_path: socket_path.into(),
            command,
            dispatch: DispatchMode::Connection,
            max_children: None,
            daemonize: true,
            socket_mode: DEFAULT_SOCKET_MODE,
            owner: None,
            group: None,
            backlog: DEFAULT_BACKLOG,
            hangup_scope: HangupScope::ProcessGroup,
            timing: Timing::default(),
        }
    }
}

/// Unvalidated configuration as collected from the command line.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    socket_path: PathBuf,
    command: Vec<OsString>,
    dispatch: DispatchMode,
    max_children: Option<usize>,
    daemonize: bool,
    socket_mode: u32,
    owner: Option<u32>,
    group: Option<u32>,
    backlog: i32,
    hangup_scope: HangupScope,
    timing: Timing,
}

impl ConfigBuilder {
    /// Set the dispatch mode.
    #[must_use]
    pub const fn with_dispatch(mut self, dispatch: DispatchMode) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Set the concurrency cap. Ignored in wait mode.
    #[must_use]
    pub const fn with_max_children(mut self, max: usize) -> Self {
        self.max_children = Some(max);
        self
    }

    #[must_use]
    pub const fn with_daemonize(mut self, daemonize: bool) -> Self {
        self.daemonize = daemonize;
        self
    }

    /// Set the socket file permission bits.
    #[must_use]
    pub const fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    /// Set the socket file owner (uid).
    #[must_use]
    pub const fn with_owner(mut self, uid: Option<u32>) -> Self {
        self.owner = uid;
        self
    }

    /// Set the socket file group (gid).
    #[must_use]
    pub const fn with_group(mut self, gid: Option<u32>) -> Self {
        self.group = gid;
        self
    }

    #[must_use]
    pub const fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    #[must_use]
    pub const fn with_hangup_scope(mut self, scope: HangupScope) -> Self {
        self.hangup_scope = scope;
        self
    }

    #[must_use]
    pub const fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<Config> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(Error::Config("socket path is empty".to_string()));
        }
        if self.socket_mode > MAX_SOCKET_MODE {
            return Err(Error::Config(format!(
                "socket mode {:o} is out of range (max {MAX_SOCKET_MODE:o})",
                self.socket_mode
            )));
        }
        if self.backlog < 1 {
            return Err(Error::Config(format!(
                "listen backlog must be positive, got {}",
                self.backlog
            )));
        }

        let max_children = match (self.dispatch, self.max_children) {
            (DispatchMode::Wait, requested) => {
                if let Some(n) = requested.filter(|&n| n != 1) {
                    warn!(requested = n, "wait mode allows a single child; ignoring max children");
                }
                1
            }
            (DispatchMode::Connection, Some(0)) => {
                return Err(Error::Config(
                    "max children must be at least 1".to_string(),
                ));
            }
            (DispatchMode::Connection, Some(n)) => n,
            (DispatchMode::Connection, None) => DEFAULT_MAX_CHILDREN,
        };

        let command = ChildCommand::from_tokens(self.command)?;

        Ok(Config {
            socket: SocketConfig {
                path: absolutize(&self.socket_path)?,
                mode: self.socket_mode,
                owner: self.owner,
                group: self.group,
                backlog: self.backlog,
            },
            command,
            dispatch: self.dispatch,
            max_children,
            daemonize: self.daemonize,
            hangup_scope: self.hangup_scope,
            timing: self.timing,
        })
    }
}

/// Parse an octal permission string such as `0660` or `0o660`.
pub fn parse_mode(s: &str) -> Result<u32> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|e| Error::Config(format!("invalid octal mode \"{s}\": {e}")))?;
    if mode > MAX_SOCKET_MODE {
        return Err(Error::Config(format!("mode \"{s}\" is out of range")));
    }
    Ok(mode)
}

/// Resolve a user name or numeric uid.
pub fn resolve_user(user: &str) -> Result<u32> {
    if let Ok(uid) = user.parse::<u32>() {
        return Ok(uid);
    }
    User::from_name(user)?
        .map(|u| u.uid.as_raw())
        .ok_or_else(|| Error::UnknownUser(user.to_string()))
}

/// Resolve a group name or numeric gid.
pub fn resolve_group(group: &str) -> Result<u32> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(gid);
    }
    Group::from_name(group)?
        .map(|g| g.gid.as_raw())
        .ok_or_else(|| Error::UnknownGroup(group.to_string()))
}

// The daemon changes directory to `/`, so relative paths are pinned early.
fn absolutize(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}
