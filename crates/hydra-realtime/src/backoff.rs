//! Reconnection backoff schedule.
//!
//! The schedule is tiered rather than exponential: the first retry is
//! immediate, a handful follow at a fast cadence, and a sustained outage
//! settles at a fixed ceiling. The loop never gives up.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{RealtimeError, Result};

/// One step of the schedule: attempts up to and including `up_to_attempt`
/// wait `delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffTier {
    /// Last attempt number (1-indexed) covered by this tier.
    pub up_to_attempt: u32,
    /// Delay before the attempt, in milliseconds.
    pub delay_ms: u64,
}

/// Configuration for reconnection backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Tiers in ascending `up_to_attempt` order (default: 1→0ms, 5→1s, 15→5s).
    pub tiers: Vec<BackoffTier>,
    /// Delay for attempts past the last tier (default: 10 seconds).
    pub ceiling_ms: u64,
    /// Extra random delay as a fraction of the base delay (default: 0.0).
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                BackoffTier {
                    up_to_attempt: 1,
                    delay_ms: 0,
                },
                BackoffTier {
                    up_to_attempt: 5,
                    delay_ms: 1_000,
                },
                BackoffTier {
                    up_to_attempt: 15,
                    delay_ms: 5_000,
                },
            ],
            ceiling_ms: 10_000,
            jitter_ratio: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Rejects unordered tiers and out-of-range jitter.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(RealtimeError::Config(format!(
                "jitter_ratio must be within 0.0..=1.0, got {}",
                self.jitter_ratio
            )));
        }
        let ordered = self
            .tiers
            .windows(2)
            .all(|w| w[0].up_to_attempt < w[1].up_to_attempt);
        if !ordered {
            return Err(RealtimeError::Config(
                "backoff tiers must have strictly ascending up_to_attempt".to_string(),
            ));
        }
        Ok(())
    }
}

/// Computes reconnection delays from a [`BackoffConfig`].
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
}

impl ReconnectBackoff {
    /// Create a schedule from the given configuration.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Base delay for the given 1-indexed attempt, without jitter.
    ///
    /// Attempt 0 is treated like attempt 1.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay_ms = self
            .config
            .tiers
            .iter()
            .find(|tier| attempt <= tier.up_to_attempt)
            .map(|tier| tier.delay_ms)
            .unwrap_or(self.config.ceiling_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay for the given attempt, jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let base_ms = base.as_millis() as u64;
        if self.config.jitter_ratio <= 0.0 || base_ms == 0 {
            return base;
        }
        let max_extra = (base_ms as f64 * self.config.jitter_ratio) as u64;
        if max_extra == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=max_extra);
        Duration::from_millis(base_ms.saturating_add(extra))
    }

    /// The configuration this schedule was built from.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let backoff = ReconnectBackoff::default();
        assert_eq!(backoff.delay_for(1), Duration::ZERO);
        assert_eq!(backoff.delay_for(3), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(10), Duration::from_millis(5000));
        assert_eq!(backoff.delay_for(20), Duration::from_millis(10000));
    }

    #[test]
    fn test_tier_boundaries() {
        let backoff = ReconnectBackoff::default();
        assert_eq!(backoff.base_delay(0), Duration::ZERO);
        assert_eq!(backoff.base_delay(2), Duration::from_secs(1));
        assert_eq!(backoff.base_delay(5), Duration::from_secs(1));
        assert_eq!(backoff.base_delay(6), Duration::from_secs(5));
        assert_eq!(backoff.base_delay(15), Duration::from_secs(5));
        assert_eq!(backoff.base_delay(16), Duration::from_secs(10));
        assert_eq!(backoff.base_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_custom_ceiling() {
        let backoff = ReconnectBackoff::new(BackoffConfig {
            ceiling_ms: 30_000,
            ..Default::default()
        });
        assert_eq!(backoff.delay_for(100), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = ReconnectBackoff::new(BackoffConfig {
            jitter_ratio: 0.5,
            ..Default::default()
        });
        assert_eq!(backoff.delay_for(1), Duration::ZERO);
        for _ in 0..100 {
            let delay = backoff.delay_for(20);
            assert!(delay >= Duration::from_millis(10_000));
            assert!(delay <= Duration::from_millis(15_000));
        }
    }

    #[test]
    fn test_validate() {
        assert!(BackoffConfig::default().validate().is_ok());

        let bad_jitter = BackoffConfig {
            jitter_ratio: 1.5,
            ..Default::default()
        };
        assert!(matches!(bad_jitter.validate(), Err(RealtimeError::Config(_))));

        let unordered = BackoffConfig {
            tiers: vec![
                BackoffTier {
                    up_to_attempt: 5,
                    delay_ms: 1,
                },
                BackoffTier {
                    up_to_attempt: 2,
                    delay_ms: 2,
                },
            ],
            ..Default::default()
        };
        assert!(unordered.validate().is_err());
    }
}
