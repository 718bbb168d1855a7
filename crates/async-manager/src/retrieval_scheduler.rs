//! Jittered, backoff-aware pacing for the periodic retrieval loop (§4.7, §5).
//!
//! Retrieval timing is deliberately randomized so an observer watching
//! network traffic cannot distinguish "checking for messages" from "sending
//! cover traffic" from the cadence alone.

use std::{
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    time::Duration,
};

use rand::Rng;
use tokio::sync::RwLock;

/// After this many consecutive empty retrievals, backoff starts doubling.
const BACKOFF_STEP: u32 = 3;

/// Backoff never multiplies the base interval by more than this.
const MAX_BACKOFF_FACTOR: u32 = 8;

/// Tunable knobs for [`RetrievalScheduler`], settable at construction and
/// reconfigurable at runtime via [`RetrievalScheduler::configure`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Baseline interval between retrieval attempts before jitter/backoff.
    pub base_interval: Duration,
    /// Symmetric jitter applied to `base_interval`, as a percentage (0-100).
    pub jitter_percent: u8,
    /// Whether cover-traffic retrievals are interleaved with real ones.
    pub cover_traffic_enabled: bool,
    /// Probability (0.0-1.0) that a given tick sends cover traffic instead of
    /// (or alongside) a real retrieval.
    pub cover_ratio: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(30),
            jitter_percent: 20,
            cover_traffic_enabled: true,
            cover_ratio: 0.3,
        }
    }
}

/// Paces the periodic retrieval loop: jittered interval, exponential backoff
/// on repeated empty results, and a cover-traffic gate.
///
/// Reconfiguration ([`Self::configure`]) is atomic with respect to concurrent
/// [`Self::next_interval`] calls: config lives behind a `RwLock` that
/// `next_interval` only ever holds across a single read, never across an
/// `.await`.
pub struct RetrievalScheduler {
    config: RwLock<SchedulerConfig>,
    consecutive_empty: AtomicU32,
    retrieval_errors: AtomicU64,
}

impl RetrievalScheduler {
    /// Construct a scheduler with the given starting configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config: RwLock::new(config), consecutive_empty: AtomicU32::new(0), retrieval_errors: AtomicU64::new(0) }
    }

    /// Replace the live configuration. Takes effect on the next
    /// [`Self::next_interval`]/[`Self::should_send_cover`] call.
    pub async fn configure(&self, config: SchedulerConfig) {
        *self.config.write().await = config;
    }

    /// Compute the delay before the next retrieval attempt: the configured
    /// base interval, jittered by `±jitter_percent%`, multiplied by the
    /// current backoff factor.
    pub async fn next_interval(&self) -> Duration {
        let config = *self.config.read().await;
        let jitter_fraction = f64::from(config.jitter_percent) / 100.0;
        let sample = rand::thread_rng().gen_range(-jitter_fraction..=jitter_fraction);
        let jittered = config.base_interval.mul_f64((1.0 + sample).max(0.0));
        jittered.mul_f64(f64::from(self.backoff_factor()))
    }

    /// Whether this tick should additionally (or instead) send cover
    /// traffic, per [`SchedulerConfig::cover_ratio`].
    pub async fn should_send_cover(&self) -> bool {
        let config = *self.config.read().await;
        config.cover_traffic_enabled && rand::thread_rng().gen_bool(config.cover_ratio.clamp(0.0, 1.0))
    }

    /// Record that a retrieval attempt returned no messages, advancing the
    /// backoff counter.
    pub fn on_empty_result(&self) {
        self.consecutive_empty.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that a retrieval attempt returned at least one message,
    /// resetting the backoff counter to its fast-polling floor.
    pub fn on_non_empty_result(&self) {
        self.consecutive_empty.store(0, Ordering::SeqCst);
    }

    /// Record that a retrieval attempt failed outright (transport or storage
    /// error, as opposed to a clean empty result).
    pub fn record_retrieval_error(&self) {
        self.retrieval_errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Total retrieval errors recorded so far, exposed for tests and
    /// operational visibility.
    #[must_use]
    pub fn retrieval_error_count(&self) -> u64 {
        self.retrieval_errors.load(Ordering::SeqCst)
    }

    fn backoff_factor(&self) -> u32 {
        let empties = self.consecutive_empty.load(Ordering::SeqCst);
        let doublings = empties / BACKOFF_STEP;
        1u32.checked_shl(doublings).unwrap_or(u32::MAX).min(MAX_BACKOFF_FACTOR)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn scheduler() -> RetrievalScheduler {
        RetrievalScheduler::new(SchedulerConfig {
            base_interval: Duration::from_secs(10),
            jitter_percent: 0,
            cover_traffic_enabled: true,
            cover_ratio: 1.0,
        })
    }

    #[tokio::test]
    async fn backoff_doubles_every_three_empties_and_caps() {
        let sched = scheduler();
        assert_eq!(sched.next_interval().await, Duration::from_secs(10));

        for _ in 0..BACKOFF_STEP {
            sched.on_empty_result();
        }
        assert_eq!(sched.next_interval().await, Duration::from_secs(20));

        for _ in 0..(BACKOFF_STEP * 10) {
            sched.on_empty_result();
        }
        assert_eq!(sched.next_interval().await, Duration::from_secs(10 * u64::from(MAX_BACKOFF_FACTOR)));
    }

    #[tokio::test]
    async fn non_empty_result_resets_backoff() {
        let sched = scheduler();
        for _ in 0..(BACKOFF_STEP * 2) {
            sched.on_empty_result();
        }
        assert!(sched.next_interval().await > Duration::from_secs(10));

        sched.on_non_empty_result();
        assert_eq!(sched.next_interval().await, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cover_traffic_respects_disabled_flag() {
        let sched = RetrievalScheduler::new(SchedulerConfig {
            base_interval: Duration::from_secs(10),
            jitter_percent: 0,
            cover_traffic_enabled: false,
            cover_ratio: 1.0,
        });
        assert!(!sched.should_send_cover().await);
    }

    #[tokio::test]
    async fn configure_takes_effect_immediately() {
        let sched = scheduler();
        sched
            .configure(SchedulerConfig {
                base_interval: Duration::from_secs(5),
                jitter_percent: 0,
                cover_traffic_enabled: false,
                cover_ratio: 0.0,
            })
            .await;
        assert_eq!(sched.next_interval().await, Duration::from_secs(5));
        assert!(!sched.should_send_cover().await);
    }

    #[test]
    fn retrieval_error_count_tracks_records() {
        let sched = scheduler();
        assert_eq!(sched.retrieval_error_count(), 0);
        sched.record_retrieval_error();
        sched.record_retrieval_error();
        assert_eq!(sched.retrieval_error_count(), 2);
    }
}
