//! Loop limits.

use std::time::Duration;

use sockspawn_core::Config;
use sockspawn_core::config::{DEFAULT_CHECK_INTERVAL, DEFAULT_MAX_CHILDREN, DEFAULT_SPAWN_BACKOFF};

/// Capacity and timing the supervision loop runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum concurrently running children.
    pub max_children: usize,
    /// Upper bound on any single blocking wait.
    pub check_interval: Duration,
    /// Pause after a spawn failed for lack of resources.
    pub spawn_backoff: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_children: DEFAULT_MAX_CHILDREN,
            check_interval: DEFAULT_CHECK_INTERVAL,
            spawn_backoff: DEFAULT_SPAWN_BACKOFF,
        }
    }
}

impl Limits {
    /// Set max children.
    #[must_use]
    pub const fn with_max_children(mut self, max: usize) -> Self {
        self.max_children = max;
        self
    }

    #[must_use]
    pub const fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_spawn_backoff(mut self, backoff: Duration) -> Self {
        self.spawn_backoff = backoff;
        self
    }
}

impl From<&Config> for Limits {
    fn from(config: &Config) -> Self {
        Self {
            max_children: config.max_children,
            check_interval: config.timing.check_interval,
            spawn_backoff: config.timing.spawn_backoff,
        }
    }
}
