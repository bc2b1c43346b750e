// ── Coordinator configuration ──
//
// Startup parameters for one coordinator. Built by the CLI (usually from a
// `kumo-config` profile) and handed in; core never reads config files.

use std::collections::HashMap;
use std::time::Duration;

use crate::model::{Field, SiteId};

/// Configuration for reconciling a single site.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Site whose devices are tracked.
    pub site_id: SiteId,
    /// Interval between full REST refreshes. Zero disables periodic refresh.
    pub refresh_interval: Duration,
    /// How long an optimistic write suppresses contradicting remote updates.
    pub hold_duration: Duration,
    /// Per-field replacements for `hold_duration`.
    pub hold_overrides: HashMap<Field, Duration>,
    /// Ask adapters for a full status push whenever the socket connects.
    pub refresh_on_connect: bool,
    pub command_retry: CommandRetry,
}

impl CoordinatorConfig {
    pub fn new(site_id: impl Into<SiteId>) -> Self {
        Self {
            site_id: site_id.into(),
            refresh_interval: Duration::from_secs(600),
            hold_duration: Duration::from_secs(10),
            hold_overrides: HashMap::new(),
            refresh_on_connect: true,
            command_retry: CommandRetry::default(),
        }
    }

    /// Hold duration for writes to `field`.
    pub fn hold_for(&self, field: Field) -> Duration {
        self.hold_overrides
            .get(&field)
            .copied()
            .unwrap_or(self.hold_duration)
    }
}

/// Retry policy for transient command failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRetry {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for CommandRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl CommandRetry {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), doubling each time.
    pub(crate) fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_the_default_hold() {
        let mut config = CoordinatorConfig::new("home");
        config
            .hold_overrides
            .insert(Field::Mode, Duration::from_secs(30));

        assert_eq!(config.hold_for(Field::Mode), Duration::from_secs(30));
        assert_eq!(config.hold_for(Field::Power), Duration::from_secs(10));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let retry = CommandRetry::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(500));
        assert_eq!(retry.backoff(2), Duration::from_secs(1));
        assert_eq!(retry.backoff(10), Duration::from_secs(5));
    }
}
