//! The listening socket: provisioning, identity tracking, activity.

pub mod activity;
pub mod identity;
pub mod provision;

pub use activity::{Activity, ActivitySource, Endpoint};
pub use identity::{IdentityError, IdentityMonitor, ListenerIdentity};
pub use provision::{ProvisionError, ProvisionedSocket, provision};
