//! `sockspawn` Core Library
//!
//! Shared functionality for the `sockspawn` supervisor:
//! - The validated configuration record
//! - Common error types
//! - Console and syslog logging setup

pub mod config;
pub mod error;
pub mod syslog;
pub mod tracing_init;

pub use config::{Config, ConfigBuilder, DispatchMode, HangupScope, Timing};
pub use error::{Error, Result};
