//! Runtime configuration for [`crate::manager::AsyncManager`] (§6).

use std::time::Duration;

use toxcore_async_crypto::{CryptoError, EpochManager};

use crate::retrieval_scheduler::SchedulerConfig;

/// 2025-01-01T00:00:00Z, matching `toxcore_async_crypto::epoch`'s default
/// genesis. Duplicated here (rather than exposing the private constant from
/// that crate) because [`AsyncConfig::epoch_duration`] is configurable while
/// [`toxcore_async_crypto::EpochManager::new`] only ever uses the default
/// genesis alongside the default duration.
const DEFAULT_GENESIS_UNIX_SECS: u64 = 1_735_689_600;

/// Knobs governing retrieval pacing, epoch rotation, pre-key bundle sizing,
/// and storage timeouts, collected in one place for a deployment to tune.
#[derive(Debug, Clone, Copy)]
pub struct AsyncConfig {
    /// Baseline interval between retrieval attempts before jitter/backoff.
    pub base_interval: Duration,
    /// Symmetric jitter applied to `base_interval`, as a percentage (0-100).
    pub jitter_percent: u8,
    /// Whether cover-traffic retrievals are interleaved with real ones.
    pub cover_traffic_enabled: bool,
    /// Probability (0.0-1.0) a given tick sends cover traffic.
    pub cover_ratio: f64,
    /// Duration of one pseudonym epoch.
    pub epoch_duration: Duration,
    /// Per-attempt timeout for a storage retrieval.
    pub retrieval_timeout: Duration,
    /// Per-attempt timeout for a storage put.
    pub put_timeout: Duration,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            jitter_percent: 20,
            cover_traffic_enabled: true,
            cover_ratio: 0.3,
            epoch_duration: Duration::from_secs(6 * 60 * 60),
            retrieval_timeout: Duration::from_secs(5),
            put_timeout: Duration::from_secs(3),
        }
    }
}

impl AsyncConfig {
    /// Build the [`EpochManager`] implied by `epoch_duration`, using the same
    /// default genesis the crypto crate uses internally.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidEpochDuration`] if `epoch_duration` is
    /// zero.
    pub fn epoch_manager(&self) -> Result<EpochManager, CryptoError> {
        let genesis = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(DEFAULT_GENESIS_UNIX_SECS);
        EpochManager::with_params(genesis, self.epoch_duration)
    }

    /// Project the retrieval-pacing fields out as a [`SchedulerConfig`].
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            base_interval: self.base_interval,
            jitter_percent: self.jitter_percent,
            cover_traffic_enabled: self.cover_traffic_enabled,
            cover_ratio: self.cover_ratio,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_epoch_manager_matches_crypto_crate_default() {
        let config = AsyncConfig::default();
        let manager = config.epoch_manager().expect("default duration is non-zero");
        let reference = EpochManager::new();
        assert_eq!(manager.current_epoch(), reference.current_epoch());
    }

    #[test]
    fn zero_epoch_duration_is_rejected() {
        let config = AsyncConfig { epoch_duration: Duration::ZERO, ..AsyncConfig::default() };
        assert!(config.epoch_manager().is_err());
    }
}
