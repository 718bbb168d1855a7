//! Maps wall-clock time to monotonically increasing epoch numbers.
//!
//! Epochs are the unit of pseudonym rotation (§4.2). An [`EpochManager`] is
//! immutable after construction and has no concurrency concerns: it is a
//! pure function of time.

use std::time::{Duration, SystemTime};

use crate::error::CryptoError;

/// Default genesis: 2025-01-01T00:00:00Z.
const DEFAULT_GENESIS_UNIX_SECS: u64 = 1_735_689_600;

/// Default epoch duration: 6 hours.
const DEFAULT_EPOCH_DURATION: Duration = Duration::from_secs(6 * 60 * 60);

/// How many epochs back `recent_epochs()` and `valid_epoch()` look.
const EPOCH_WINDOW: u64 = 3;

/// Maps wall time to epoch numbers of fixed duration from a fixed genesis.
#[derive(Debug, Clone, Copy)]
pub struct EpochManager {
    genesis: SystemTime,
    duration: Duration,
}

impl EpochManager {
    /// Construct with the default genesis (2025-01-01T00:00:00Z) and default
    /// 6-hour epoch duration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            genesis: SystemTime::UNIX_EPOCH + Duration::from_secs(DEFAULT_GENESIS_UNIX_SECS),
            duration: DEFAULT_EPOCH_DURATION,
        }
    }

    /// Construct with a custom genesis and epoch duration.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidEpochDuration`] if `duration` is zero.
    pub fn with_params(genesis: SystemTime, duration: Duration) -> Result<Self, CryptoError> {
        if duration.is_zero() {
            return Err(CryptoError::InvalidEpochDuration);
        }
        Ok(Self { genesis, duration })
    }

    /// Epoch duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Epoch number containing time `t`. Clamped to 0 for times before
    /// genesis.
    #[must_use]
    pub fn epoch_at(&self, t: SystemTime) -> u64 {
        let Ok(elapsed) = t.duration_since(self.genesis) else {
            return 0;
        };
        let duration_nanos = self.duration.as_nanos().max(1);
        let elapsed_nanos = elapsed.as_nanos();
        u64::try_from(elapsed_nanos / duration_nanos).unwrap_or(u64::MAX)
    }

    /// Epoch number containing the current time.
    #[must_use]
    pub fn current_epoch(&self) -> u64 {
        self.epoch_at(SystemTime::now())
    }

    /// Start instant of epoch `e`.
    #[must_use]
    pub fn epoch_start(&self, e: u64) -> SystemTime {
        self.genesis + self.duration * u32::try_from(e).unwrap_or(u32::MAX)
    }

    /// End instant of epoch `e` (one nanosecond before the next epoch
    /// starts).
    #[must_use]
    pub fn epoch_end(&self, e: u64) -> SystemTime {
        self.epoch_start(e + 1) - Duration::from_nanos(1)
    }

    /// True iff `e` falls within the last `EPOCH_WINDOW` epochs (inclusive of
    /// the current one).
    #[must_use]
    pub fn valid_epoch(&self, e: u64) -> bool {
        let current = self.current_epoch();
        let floor = current.saturating_sub(EPOCH_WINDOW);
        e >= floor && e <= current
    }

    /// The current epoch and up to `EPOCH_WINDOW` prior epochs, descending,
    /// clipped at 0. Used by [`crate::Obfuscation::unwrap`] to try matching
    /// pseudonyms across the retrieval window.
    #[must_use]
    pub fn recent_epochs(&self) -> Vec<u64> {
        let current = self.current_epoch();
        (0..=EPOCH_WINDOW).filter_map(|back| current.checked_sub(back)).collect()
    }

    /// Time remaining until the next epoch boundary, measured from now.
    #[must_use]
    pub fn time_until_next_epoch(&self) -> Duration {
        let now = SystemTime::now();
        let current = self.current_epoch();
        let next_start = self.epoch_start(current + 1);
        next_start.duration_since(now).unwrap_or(Duration::ZERO)
    }
}

impl Default for EpochManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_duration() {
        assert!(EpochManager::with_params(SystemTime::UNIX_EPOCH, Duration::ZERO).is_err());
    }

    #[test]
    fn epoch_at_genesis_is_zero() {
        let mgr =
            EpochManager::with_params(SystemTime::UNIX_EPOCH, Duration::from_secs(3600)).unwrap();
        assert_eq!(mgr.epoch_at(SystemTime::UNIX_EPOCH), 0);
    }

    #[test]
    fn epoch_at_clamps_before_genesis() {
        let genesis = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        let mgr = EpochManager::with_params(genesis, Duration::from_secs(3600)).unwrap();
        assert_eq!(mgr.epoch_at(SystemTime::UNIX_EPOCH), 0);
    }

    #[test]
    fn epoch_at_is_monotonic() {
        let mgr =
            EpochManager::with_params(SystemTime::UNIX_EPOCH, Duration::from_secs(3600)).unwrap();
        let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let t2 = SystemTime::UNIX_EPOCH + Duration::from_secs(5000);
        assert!(mgr.epoch_at(t1) <= mgr.epoch_at(t2));
    }

    #[test]
    fn epoch_start_round_trips_through_epoch_at() {
        let mgr =
            EpochManager::with_params(SystemTime::UNIX_EPOCH, Duration::from_secs(3600)).unwrap();
        for e in [0u64, 1, 5, 100] {
            let start = mgr.epoch_start(e);
            assert_eq!(mgr.epoch_at(start), e);
        }
    }

    #[test]
    fn epoch_end_is_just_before_next_start() {
        let mgr =
            EpochManager::with_params(SystemTime::UNIX_EPOCH, Duration::from_secs(3600)).unwrap();
        let end = mgr.epoch_end(3);
        let next_start = mgr.epoch_start(4);
        assert_eq!(next_start.duration_since(end).unwrap(), Duration::from_nanos(1));
    }

    #[test]
    fn recent_epochs_clips_at_zero() {
        let mgr =
            EpochManager::with_params(SystemTime::UNIX_EPOCH, Duration::from_secs(3600)).unwrap();
        // "current" here is derived from SystemTime::now(), far past genesis,
        // so recent_epochs should have exactly 4 entries, descending.
        let recent = mgr.recent_epochs();
        assert_eq!(recent.len(), 4);
        for pair in recent.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[test]
    fn valid_epoch_matches_recent_window() {
        let mgr = EpochManager::new();
        let current = mgr.current_epoch();
        assert!(mgr.valid_epoch(current));
        assert!(mgr.valid_epoch(current.saturating_sub(3)));
        assert!(!mgr.valid_epoch(current.saturating_sub(4)));
        assert!(!mgr.valid_epoch(current + 1));
    }
}
