//! Tracing/logging initialization.
//!
//! Console output goes to standard error (plain or JSON); the syslog layer
//! keeps logging alive after the daemon detaches from its terminal.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::syslog::SyslogLayer;

/// Default filter directive for the sockspawn crates.
pub fn default_filter(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    format!("sockspawn={level},sockspawn_daemon={level},sockspawn_core={level}")
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set.
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
/// * `syslog` -- when `true`, also forward events to the system log.
pub fn init_tracing(default_filter: &str, log_json: bool, syslog: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    let syslog = syslog.then(SyslogLayer::open);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .with(syslog)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(syslog)
            .init();
    }
}
