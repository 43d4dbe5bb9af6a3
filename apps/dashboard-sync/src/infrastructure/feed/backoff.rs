//! Backoff Scheduler
//!
//! Exponential reconnect delays with an attempt ceiling. The scheduler is
//! stateless: the owning feed supervisor keeps the attempt counter and asks
//! for a decision after every close.
//!
//! With the defaults (1 s base, doubling, 30 s cap, 5 attempts) the first
//! four consecutive closes retry after 1, 2, 4 and 8 seconds and the fifth
//! is reported as permanent failure.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnect backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt. Values below 1.0 are treated as 1.0.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.0 disables jitter).
    pub jitter_factor: f64,
    /// Consecutive closes tolerated before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl BackoffConfig {
    /// Same settings with a different attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// What the owner should do after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then open a new connection.
    Retry {
        /// Wait before reconnecting.
        delay: Duration,
        /// Attempt counter to carry into the next cycle.
        attempt: u32,
    },
    /// Stop reconnecting and surface the feed as disconnected.
    GiveUp {
        /// Consecutive closes observed.
        attempts: u32,
    },
}

/// Reconnect delay calculator.
///
/// # Example
///
/// ```rust
/// use dashboard_sync::infrastructure::feed::backoff::{BackoffConfig, BackoffScheduler, ReconnectDecision};
/// use std::time::Duration;
///
/// let scheduler = BackoffScheduler::new(BackoffConfig::default());
/// assert_eq!(scheduler.next_delay(0), Duration::from_millis(1000));
/// assert_eq!(scheduler.next_delay(1), Duration::from_millis(2000));
/// assert!(matches!(scheduler.on_close(4), ReconnectDecision::GiveUp { attempts: 5 }));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    config: BackoffConfig,
}

impl BackoffScheduler {
    /// Create a scheduler.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// `min(base * multiplier^attempt, cap)`, plus jitter when configured.
    ///
    /// Total over every `attempt` and never above the cap.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let cap = self.config.max_delay;
        let base_millis = duration_millis_f64(self.config.base_delay);
        let cap_millis = duration_millis_f64(cap);
        let multiplier = self.config.multiplier.max(1.0);

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = base_millis * multiplier.powi(exponent);
        let millis = if scaled.is_finite() {
            scaled.min(cap_millis)
        } else {
            cap_millis
        };

        let delay = millis_to_duration(millis);
        self.apply_jitter(delay).min(cap)
    }

    /// Decide what to do after a close.
    ///
    /// `attempt` is the feed's attempt counter at the moment of the close,
    /// so this close is the `attempt + 1`-th in a row.
    #[must_use]
    pub fn on_close(&self, attempt: u32) -> ReconnectDecision {
        let consecutive = attempt.saturating_add(1);
        if self.config.max_attempts > 0 && consecutive >= self.config.max_attempts {
            return ReconnectDecision::GiveUp {
                attempts: consecutive,
            };
        }

        ReconnectDecision::Retry {
            delay: self.next_delay(attempt),
            attempt: consecutive,
        }
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        let base_millis = duration_millis_f64(duration);
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        millis_to_duration((base_millis + jitter).max(1.0))
    }
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[allow(clippy::cast_precision_loss)]
fn duration_millis_f64(duration: Duration) -> f64 {
    duration.as_millis() as f64
}

fn millis_to_duration(millis: f64) -> Duration {
    if !millis.is_finite() || millis <= 0.0 {
        return Duration::ZERO;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = millis.round() as u64;
    Duration::from_millis(whole)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scheduler() -> BackoffScheduler {
        BackoffScheduler::default()
    }

    #[test]
    fn default_config_values() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn delays_double_until_cap() {
        let s = scheduler();
        let delays: Vec<u128> = (0..7).map(|a| s.next_delay(a).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn huge_attempts_stay_at_cap() {
        let s = scheduler();
        assert_eq!(s.next_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn consecutive_closes_then_give_up() {
        let s = scheduler();

        assert_eq!(
            s.on_close(0),
            ReconnectDecision::Retry {
                delay: Duration::from_millis(1000),
                attempt: 1
            }
        );
        assert_eq!(
            s.on_close(1),
            ReconnectDecision::Retry {
                delay: Duration::from_millis(2000),
                attempt: 2
            }
        );
        assert!(matches!(s.on_close(3), ReconnectDecision::Retry { .. }));
        assert_eq!(s.on_close(4), ReconnectDecision::GiveUp { attempts: 5 });
    }

    #[test]
    fn unlimited_attempts_never_give_up() {
        let s = BackoffScheduler::new(BackoffConfig::default().with_max_attempts(0));
        for attempt in 0..1000 {
            assert!(matches!(s.on_close(attempt), ReconnectDecision::Retry { .. }));
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let s = BackoffScheduler::new(BackoffConfig {
            jitter_factor: 0.1,
            ..BackoffConfig::default()
        });

        for _ in 0..100 {
            let millis = s.next_delay(0).as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let s = BackoffScheduler::new(BackoffConfig {
            jitter_factor: 0.5,
            ..BackoffConfig::default()
        });
        for _ in 0..100 {
            assert!(s.next_delay(10) <= Duration::from_secs(30));
        }
    }

    proptest! {
        #[test]
        fn delay_is_monotone_and_capped(a in 0u32..64, b in 0u32..64) {
            let s = scheduler();
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(s.next_delay(low) <= s.next_delay(high));
        }

        #[test]
        fn delay_never_exceeds_cap(
            attempt in any::<u32>(),
            base_ms in 1u64..10_000,
            cap_ms in 1u64..120_000,
            multiplier in 1.0f64..10.0,
        ) {
            let s = BackoffScheduler::new(BackoffConfig {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(cap_ms),
                multiplier,
                jitter_factor: 0.0,
                max_attempts: 5,
            });
            prop_assert!(s.next_delay(attempt) <= Duration::from_millis(cap_ms));
        }
    }
}
