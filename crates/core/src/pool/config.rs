//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker slots. 0 = derive from host parallelism
    /// (available cores minus one, minimum one). Fixed at pool creation.
    #[serde(default)]
    pub slots: usize,

    /// How many slots start enabled. 0 = derive the default (half the
    /// pool, minimum one). The enabled subset stays adjustable at runtime.
    #[serde(default)]
    pub enabled_limit: usize,

    /// Startup jitter window in milliseconds: each slot waits a uniformly
    /// random delay in this range before launching its encoder, avoiding a
    /// thundering-herd launch.
    #[serde(default = "default_start_delay_min")]
    pub start_delay_min_ms: u64,
    #[serde(default = "default_start_delay_max")]
    pub start_delay_max_ms: u64,

    /// Teardown jitter window in milliseconds: how long a finished or
    /// errored slot shows its terminal state before recycling to waiting.
    #[serde(default = "default_teardown_delay_min")]
    pub teardown_delay_min_ms: u64,
    #[serde(default = "default_teardown_delay_max")]
    pub teardown_delay_max_ms: u64,
}

fn default_start_delay_min() -> u64 {
    600
}

fn default_start_delay_max() -> u64 {
    3000
}

fn default_teardown_delay_min() -> u64 {
    1000
}

fn default_teardown_delay_max() -> u64 {
    2000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slots: 0,
            enabled_limit: 0,
            start_delay_min_ms: default_start_delay_min(),
            start_delay_max_ms: default_start_delay_max(),
            teardown_delay_min_ms: default_teardown_delay_min(),
            teardown_delay_max_ms: default_teardown_delay_max(),
        }
    }
}

impl PoolConfig {
    /// A configuration with both jitter windows collapsed to zero; used by
    /// tests that need deterministic timing.
    pub fn immediate() -> Self {
        Self {
            start_delay_min_ms: 0,
            start_delay_max_ms: 0,
            teardown_delay_min_ms: 0,
            teardown_delay_max_ms: 0,
            ..Default::default()
        }
    }

    /// Resolved slot count: configured value, or host parallelism minus
    /// one, minimum one.
    pub fn slot_count(&self) -> usize {
        if self.slots > 0 {
            return self.slots;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if cores > 1 {
            cores - 1
        } else {
            1
        }
    }

    /// Resolved count of initially enabled slots for a pool of `slots`.
    pub fn resolved_enabled_limit(&self, slots: usize) -> usize {
        if self.enabled_limit > 0 {
            return self.enabled_limit.min(slots);
        }
        if slots <= 1 {
            1
        } else {
            slots / 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_jitter_windows() {
        let config = PoolConfig::default();
        assert_eq!(config.start_delay_min_ms, 600);
        assert_eq!(config.start_delay_max_ms, 3000);
        assert_eq!(config.teardown_delay_min_ms, 1000);
        assert_eq!(config.teardown_delay_max_ms, 2000);
    }

    #[test]
    fn test_slot_count_floor() {
        let config = PoolConfig {
            slots: 4,
            ..Default::default()
        };
        assert_eq!(config.slot_count(), 4);

        let auto = PoolConfig::default();
        assert!(auto.slot_count() >= 1);
    }

    #[test]
    fn test_enabled_limit_half_pool_default() {
        let config = PoolConfig::default();
        assert_eq!(config.resolved_enabled_limit(1), 1);
        assert_eq!(config.resolved_enabled_limit(2), 1);
        assert_eq!(config.resolved_enabled_limit(7), 3);
        assert_eq!(config.resolved_enabled_limit(8), 4);
    }

    #[test]
    fn test_enabled_limit_clamped_to_pool() {
        let config = PoolConfig {
            enabled_limit: 16,
            ..Default::default()
        };
        assert_eq!(config.resolved_enabled_limit(4), 4);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            slots = 2
        "#;
        let config: PoolConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.slots, 2);
        assert_eq!(config.start_delay_max_ms, 3000);
    }
}
