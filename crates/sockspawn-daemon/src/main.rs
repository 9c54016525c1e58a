//! `sockspawn`
//!
//! Listens on a local socket and starts one instance of a program per
//! connection, with the connection as the program's stdin, stdout and stderr.

use std::ffi::OsString;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use sockspawn_core::config::{DEFAULT_BACKLOG, parse_mode, resolve_group, resolve_user};
use sockspawn_core::tracing_init::{default_filter, init_tracing};
use sockspawn_core::{Config, DispatchMode, HangupScope};
use sockspawn_daemon::shutdown;
use sockspawn_daemon::socket::{Endpoint, IdentityMonitor, ProvisionedSocket, provision};
use sockspawn_daemon::subprocess::{ChildProcesses, ChildSpawner};
use sockspawn_daemon::supervisor::{ExitReason, Limits, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "sockspawn")]
#[command(
    version,
    about = "Start a program for every connection to a local socket"
)]
struct Args {
    /// Maximum concurrently running children [default: 30]
    #[arg(short = 'N', long, env = "SOCKSPAWN_MAX_CHILDREN")]
    max_children: Option<usize>,

    /// Hand the listening socket itself to a single child, which accepts on its own
    #[arg(short, long, env = "SOCKSPAWN_WAIT")]
    wait: bool,

    /// Enable debug logging
    #[arg(short, long, env = "SOCKSPAWN_DEBUG")]
    debug: bool,

    /// Socket file permissions (octal)
    #[arg(short, long, default_value = "0666", env = "SOCKSPAWN_MODE")]
    mode: String,

    /// Socket file owner (name or uid)
    #[arg(short, long, env = "SOCKSPAWN_USER")]
    user: Option<String>,

    /// Socket file group (name or gid)
    #[arg(short, long, env = "SOCKSPAWN_GROUP")]
    group: Option<String>,

    /// Stay in the foreground instead of daemonising
    #[arg(short, long, env = "SOCKSPAWN_FOREGROUND")]
    foreground: bool,

    /// Listen backlog
    #[arg(long, default_value_t = DEFAULT_BACKLOG, env = "SOCKSPAWN_BACKLOG")]
    backlog: i32,

    /// Who receives SIGHUP on shutdown: the whole process group or only our children
    #[arg(long, default_value = "group", env = "SOCKSPAWN_HANGUP_SCOPE")]
    hangup_scope: HangupScope,

    /// Output logs as JSON (for structured log aggregation)
    #[arg(long, env = "SOCKSPAWN_LOG_JSON")]
    log_json: bool,

    /// Do not forward logs to syslog
    #[arg(long, env = "SOCKSPAWN_NO_SYSLOG")]
    no_syslog: bool,

    /// Path of the listening socket
    socket: PathBuf,

    /// Program to run for each connection, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<OsString>,
}

impl Args {
    fn into_config(self) -> sockspawn_core::Result<Config> {
        let owner = self.user.as_deref().map(resolve_user).transpose()?;
        let group = self.group.as_deref().map(resolve_group).transpose()?;
        let dispatch = if self.wait {
            DispatchMode::Wait
        } else {
            DispatchMode::Connection
        };

        let mut builder = Config::builder(self.socket, self.command)
            .with_dispatch(dispatch)
            .with_daemonize(!self.foreground)
            .with_socket_mode(parse_mode(&self.mode)?)
            .with_owner(owner)
            .with_group(group)
            .with_backlog(self.backlog)
            .with_hangup_scope(self.hangup_scope);
        if let Some(max) = self.max_children {
            builder = builder.with_max_children(max);
        }
        builder.build()
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(&default_filter(args.debug), args.log_json, !args.no_syslog);

    match run(args) {
        Ok(reason) => {
            info!(?reason, "exiting.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("exiting on fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitReason> {
    let config = args.into_config().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket = %config.socket.path.display(),
        program = %config.command.program.display(),
        max_children = config.max_children,
        dispatch = ?config.dispatch,
        "Starting sockspawn"
    );

    let ProvisionedSocket { listener, monitor } = provision(&config.socket)?;

    if config.daemonize {
        daemonize()?;
    }

    // Children are the unit of concurrency; one thread drives the loop.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("could not start the runtime")?;
    runtime.block_on(supervise(&config, listener, monitor))
}

async fn supervise(
    config: &Config,
    listener: UnixListener,
    monitor: IdentityMonitor,
) -> anyhow::Result<ExitReason> {
    let shutdown = shutdown::install().context("could not install signal handlers")?;
    let endpoint = Endpoint::new(listener, config.dispatch)
        .context("could not register the listener")?;
    let children = ChildProcesses::new(
        ChildSpawner::new(config.command.clone()),
        config.hangup_scope,
    )
    .context("could not watch for child exits")?;

    notify_ready();

    let mut supervisor = Supervisor::new(
        Limits::from(config),
        endpoint,
        children,
        monitor,
        shutdown,
    );
    Ok(supervisor.run().await)
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
fn daemonize() -> anyhow::Result<()> {
    nix::unistd::daemon(false, false).context("could not daemonise")?;
    Ok(())
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
fn daemonize() -> anyhow::Result<()> {
    anyhow::bail!("daemonising is not supported on this platform; use --foreground")
}

/// Tell a service manager we are ready, if one is listening.
///
/// `NOTIFY_SOCKET` is unset so children do not inherit it.
fn notify_ready() {
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %e, "Could not notify the service manager");
    }
}
