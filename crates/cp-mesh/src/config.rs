//! Gossip timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::GossipError;

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default interval between probe rounds.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 1_000;

/// Default wait for a direct ack before falling back to indirect probes.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 300;

/// Default number of peers asked to probe on our behalf.
pub const DEFAULT_INDIRECT_PROBES: usize = 3;

/// Default time without fresh evidence before an alive member is suspected.
pub const DEFAULT_SUSPECT_AFTER_MS: u64 = 5_000;

/// Default time a member may stay suspect before it is declared dead.
pub const DEFAULT_SUSPICION_TIMEOUT_MS: u64 = 5_000;

/// Default window in which a suspect member's load is still trusted.
pub const DEFAULT_STALENESS_WINDOW_MS: u64 = 2_000;

/// Default time a dead member is kept before it is reaped.
pub const DEFAULT_DEAD_RETENTION_MS: u64 = 60_000;

/// Default number of member updates attached to each message.
pub const DEFAULT_MAX_PIGGYBACK: usize = 8;

/// Default interval between registry peer refreshes.
pub const DEFAULT_REGISTRY_REFRESH_MS: u64 = 30_000;

/// Largest datagram the agent sends.
pub const MAX_DATAGRAM_BYTES: usize = 1_400;

const fn default_probe_interval_ms() -> u64 {
    DEFAULT_PROBE_INTERVAL_MS
}

const fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

const fn default_indirect_probes() -> usize {
    DEFAULT_INDIRECT_PROBES
}

const fn default_suspect_after_ms() -> u64 {
    DEFAULT_SUSPECT_AFTER_MS
}

const fn default_suspicion_timeout_ms() -> u64 {
    DEFAULT_SUSPICION_TIMEOUT_MS
}

const fn default_staleness_window_ms() -> u64 {
    DEFAULT_STALENESS_WINDOW_MS
}

const fn default_dead_retention_ms() -> u64 {
    DEFAULT_DEAD_RETENTION_MS
}

const fn default_max_piggyback() -> usize {
    DEFAULT_MAX_PIGGYBACK
}

const fn default_registry_refresh_ms() -> u64 {
    DEFAULT_REGISTRY_REFRESH_MS
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Gossip timings, as read from the `[gossip]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GossipConfig {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_indirect_probes")]
    pub indirect_probes: usize,
    #[serde(default = "default_suspect_after_ms")]
    pub suspect_after_ms: u64,
    #[serde(default = "default_suspicion_timeout_ms")]
    pub suspicion_timeout_ms: u64,
    #[serde(default = "default_staleness_window_ms")]
    pub staleness_window_ms: u64,
    #[serde(default = "default_dead_retention_ms")]
    pub dead_retention_ms: u64,
    #[serde(default = "default_max_piggyback")]
    pub max_piggyback: usize,
    #[serde(default = "default_registry_refresh_ms")]
    pub registry_refresh_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            indirect_probes: DEFAULT_INDIRECT_PROBES,
            suspect_after_ms: DEFAULT_SUSPECT_AFTER_MS,
            suspicion_timeout_ms: DEFAULT_SUSPICION_TIMEOUT_MS,
            staleness_window_ms: DEFAULT_STALENESS_WINDOW_MS,
            dead_retention_ms: DEFAULT_DEAD_RETENTION_MS,
            max_piggyback: DEFAULT_MAX_PIGGYBACK,
            registry_refresh_ms: DEFAULT_REGISTRY_REFRESH_MS,
        }
    }
}

impl GossipConfig {
    /// Set the probe interval and timeout.
    #[must_use]
    pub const fn with_probe(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.probe_interval_ms = interval_ms;
        self.probe_timeout_ms = timeout_ms;
        self
    }

    /// Set the suspect-after and suspicion timeouts.
    #[must_use]
    pub const fn with_suspicion(mut self, suspect_after_ms: u64, timeout_ms: u64) -> Self {
        self.suspect_after_ms = suspect_after_ms;
        self.suspicion_timeout_ms = timeout_ms;
        self
    }

    /// Set the staleness window.
    #[must_use]
    pub const fn with_staleness_window(mut self, window_ms: u64) -> Self {
        self.staleness_window_ms = window_ms;
        self
    }

    /// Set dead-member retention.
    #[must_use]
    pub const fn with_dead_retention(mut self, retention_ms: u64) -> Self {
        self.dead_retention_ms = retention_ms;
        self
    }

    /// Set the registry refresh interval.
    #[must_use]
    pub const fn with_registry_refresh(mut self, refresh_ms: u64) -> Self {
        self.registry_refresh_ms = refresh_ms;
        self
    }

    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    #[must_use]
    pub const fn registry_refresh(&self) -> Duration {
        Duration::from_millis(self.registry_refresh_ms)
    }

    /// Check that the timings are consistent.
    ///
    /// # Errors
    /// Returns [`GossipError::InvalidConfig`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), GossipError> {
        let invalid = |message: &str| Err(GossipError::InvalidConfig(message.to_string()));
        if self.probe_interval_ms == 0 {
            return invalid("probe_interval_ms must be positive");
        }
        if self.probe_timeout_ms == 0 || self.probe_timeout_ms >= self.probe_interval_ms {
            return invalid("probe_timeout_ms must be positive and below probe_interval_ms");
        }
        if self.suspect_after_ms < self.probe_interval_ms {
            return invalid("suspect_after_ms must be at least probe_interval_ms");
        }
        if self.suspicion_timeout_ms == 0 {
            return invalid("suspicion_timeout_ms must be positive");
        }
        if self.staleness_window_ms < self.probe_interval_ms {
            return invalid("staleness_window_ms must be at least probe_interval_ms");
        }
        if self.max_piggyback == 0 {
            return invalid("max_piggyback must be at least 1");
        }
        if self.registry_refresh_ms == 0 {
            return invalid("registry_refresh_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(GossipConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_timeout_not_below_interval() {
        let config = GossipConfig::default().with_probe(500, 500);
        assert!(matches!(
            config.validate(),
            Err(GossipError::InvalidConfig(message)) if message.contains("probe_timeout_ms")
        ));
    }

    #[test]
    fn rejects_short_staleness_window() {
        let config = GossipConfig::default().with_staleness_window(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_table_uses_defaults() {
        let config: GossipConfig = serde_json::from_str(r#"{"probe_interval_ms": 250, "probe_timeout_ms": 100}"#)
            .expect("parse");
        assert_eq!(config.probe_interval(), Duration::from_millis(250));
        assert_eq!(config.max_piggyback, DEFAULT_MAX_PIGGYBACK);
    }
}
