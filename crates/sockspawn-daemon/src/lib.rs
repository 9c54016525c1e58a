//! sockspawn daemon library
//!
//! The pieces of the supervisor, wired together by the `sockspawn` binary:
//! - Socket provisioning and listener identity tracking
//! - Activity sources (accepted connections, listener readiness)
//! - Child spawning, reaping and hang-up broadcast
//! - Shutdown coordination and the supervision loop

pub mod shutdown;
pub mod socket;
pub mod subprocess;
pub mod supervisor;
