//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use lastword_core::PolicyLimits;
use lastword_delivery::DeliveryConfig;

/// Configuration for the scheduler sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Most due messages released per sweep. Also the page size used to
    /// scan `Delivering` messages, all of which are scanned every sweep.
    pub batch_limit: usize,
    /// Delivery passes run concurrently within a sweep.
    pub max_concurrent_deliveries: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_limit: 100,
            max_concurrent_deliveries: 8,
        }
    }
}

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub delivery: DeliveryConfig,
    /// Intake limits, including how far ahead of the clock a check-in may be.
    pub limits: PolicyLimits,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastword_core::{DeliveryTier, QuorumPolicy};

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.interval, Duration::from_secs(60));
        assert_eq!(
            config.delivery.tiers.policy(DeliveryTier::PriorityRetry).quorum,
            QuorumPolicy::Unanimous
        );
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = EngineConfig::default();
        config.scheduler.batch_limit = 7;
        config.delivery.message_ceiling_ms = 1_000;

        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
