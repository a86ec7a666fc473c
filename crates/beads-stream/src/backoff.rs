//! Reconnection backoff
//!
//! Delay for the n-th consecutive failure is `min(initial × multiplier^n, max)`,
//! randomized by up to ±`jitter` of itself. After `max_attempts` retries the
//! backoff is exhausted and the channel waits for a manual retry.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// First reconnection delay in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound on the delay in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor per failed attempt
    pub multiplier: u32,
    /// Maximum relative jitter (0.3 = ±30%)
    pub jitter: f64,
    /// Retries before giving up
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Create default policy
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With initial delay
    #[inline]
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = duration_ms(delay);
        self
    }

    /// With maximum delay
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_ms(delay);
        self
    }

    /// With jitter fraction, clamped to `[0, 1]`
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// With retry ceiling
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Initial delay
    #[inline]
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Maximum delay
    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Un-jittered delay after `failures` consecutive failures
    #[must_use]
    pub fn base_delay(&self, failures: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1))
            .checked_pow(failures)
            .unwrap_or(u64::MAX);
        Duration::from_millis(
            self.initial_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    /// Apply random jitter of up to ±`jitter` to `base`
    #[must_use]
    pub fn jittered<R: Rng + ?Sized>(&self, base: Duration, rng: &mut R) -> Duration {
        let spread = base.as_secs_f64() * self.jitter;
        if !spread.is_finite() || spread <= 0.0 {
            return base;
        }
        let offset = rng.gen_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.0))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2,
            jitter: 0.3,
            max_attempts: 50,
        }
    }
}

/// Backoff state for one channel
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    delay: Duration,
    rng: StdRng,
}

impl Backoff {
    /// Create backoff seeded from OS entropy
    #[inline]
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Create backoff with deterministic jitter
    #[inline]
    #[must_use]
    pub fn with_seed(policy: BackoffPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: BackoffPolicy, rng: StdRng) -> Self {
        Self {
            attempt: 0,
            delay: policy.initial_delay(),
            policy,
            rng,
        }
    }

    /// Retries scheduled since the last reset
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay the next retry will use
    #[inline]
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Policy in effect
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Whether the retry ceiling is reached
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }

    /// Back to defaults after a successful open or a manual retry
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.policy.initial_delay();
    }

    /// Record a failure and return the wait before the next attempt
    ///
    /// Returns `None` once exhausted; the state is left untouched so repeated
    /// calls keep returning `None` until [`reset`](Self::reset).
    pub fn next_wait(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let wait = self.policy.jittered(self.delay, &mut self.rng);
        self.attempt += 1;
        self.delay = self.policy.base_delay(self.attempt);
        Some(wait)
    }
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn base_delay_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_millis(1_000));
        assert_eq!(policy.base_delay(1), Duration::from_millis(2_000));
        assert_eq!(policy.base_delay(4), Duration::from_millis(16_000));
        assert_eq!(policy.base_delay(5), Duration::from_millis(30_000));
        assert_eq!(policy.base_delay(49), Duration::from_millis(30_000));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn backoff_tracks_policy_formula() {
        let mut backoff = Backoff::with_seed(BackoffPolicy::default().with_jitter(0.0), 7);
        for n in 0..10 {
            assert_eq!(backoff.current_delay(), backoff.policy().base_delay(n));
            let wait = backoff.next_wait().unwrap();
            assert_eq!(wait, BackoffPolicy::default().base_delay(n));
        }
        assert_eq!(backoff.attempt(), 10);
    }

    #[test]
    fn backoff_exhausts_after_max_attempts() {
        let mut backoff = Backoff::with_seed(BackoffPolicy::default(), 1);
        for _ in 0..50 {
            assert!(backoff.next_wait().is_some());
        }
        assert!(backoff.is_exhausted());
        assert!(backoff.next_wait().is_none());
        assert!(backoff.next_wait().is_none());
        assert_eq!(backoff.attempt(), 50);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut backoff = Backoff::with_seed(BackoffPolicy::default(), 3);
        backoff.next_wait();
        backoff.next_wait();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.current_delay(), Duration::from_millis(1_000));
    }

    #[test]
    fn policy_deserializes_partial_toml_style_json() {
        let policy: BackoffPolicy = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay_ms, 1_000);
    }

    #[test]
    fn non_finite_jitter_falls_back_to_base_delay() {
        for jitter in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let policy = BackoffPolicy {
                jitter,
                ..BackoffPolicy::default()
            };
            let mut backoff = Backoff::with_seed(policy, 5);
            assert_eq!(backoff.next_wait(), Some(Duration::from_millis(1_000)));
            assert_eq!(backoff.next_wait(), Some(Duration::from_millis(2_000)));
        }
    }

    proptest! {
        #[test]
        fn jitter_stays_within_thirty_percent(failures in 0u32..64, seed in any::<u64>()) {
            let policy = BackoffPolicy::default();
            let mut rng = StdRng::seed_from_u64(seed);
            let base = policy.base_delay(failures);
            let wait = policy.jittered(base, &mut rng).as_secs_f64();
            let base = base.as_secs_f64();
            prop_assert!(wait >= base * 0.7 - 1e-9);
            prop_assert!(wait <= base * 1.3 + 1e-9);
        }
    }
}
