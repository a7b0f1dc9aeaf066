//! Reconnect scheduling.
//!
//! After a connection ends the client asks its [`ReconnectPolicy`] how long to
//! wait before the next attempt.  A policy that returns `None` stops the
//! client from reconnecting (the client then reports `LinkState::GaveUp`).
//!
//! Attempts are numbered from 1 and the count restarts whenever a connection
//! reaches `Ready`, at which point the client also calls
//! [`ReconnectPolicy::reset`].

use std::time::Duration;

use rand::RngExt;

use crate::domain::config::ReconnectConfig;

/// Decides when, and whether, to reconnect.
#[cfg_attr(test, mockall::automock)]
pub trait ReconnectPolicy: Send {
    /// Delay before reconnect attempt number `attempt` (1-based), or `None` to
    /// give up.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Called when a connection reaches `Ready`.
    fn reset(&mut self) {}
}

/// The same delay before every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Retries forever, waiting `delay` each time.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Gives up once `max` attempts have been scheduled.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }
}

/// Exponentially growing delay with optional jitter.
///
/// The base delay for attempt `n` is `initial * multiplier^(n-1)`, capped at
/// `max`.  With a non-zero jitter the actual delay is drawn uniformly from
/// `[base * (1 - jitter), base]`, which spreads out clients that lost their
/// connection at the same moment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Fraction of the base delay that may be shaved off at random, clamped
    /// to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// The delay for `attempt` before jitter is applied.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let secs = self.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        let base = self.base_delay(attempt);
        if self.jitter == 0.0 {
            return Some(base);
        }
        let shave = rand::rng().random_range(0.0..=self.jitter);
        Some(base.mul_f64(1.0 - shave))
    }
}

/// Builds the policy described by `config`.
pub fn policy_from_config(config: &ReconnectConfig) -> Box<dyn ReconnectPolicy> {
    match config {
        ReconnectConfig::Fixed {
            delay,
            max_attempts,
        } => {
            let mut policy = FixedDelay::new(*delay);
            if let Some(max) = max_attempts {
                policy = policy.with_max_attempts(*max);
            }
            Box::new(policy)
        }
        ReconnectConfig::Exponential {
            initial,
            max,
            multiplier,
            jitter,
            max_attempts,
        } => {
            let mut policy = ExponentialBackoff::new(*initial, *max)
                .with_multiplier(*multiplier)
                .with_jitter(*jitter);
            if let Some(limit) = max_attempts {
                policy = policy.with_max_attempts(*limit);
            }
            Box::new(policy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_is_constant_and_unbounded() {
        // Arrange
        let mut policy = FixedDelay::new(Duration::from_secs(2));

        // Act / Assert
        for attempt in [1, 2, 10, 10_000] {
            assert_eq!(policy.next_delay(attempt), Some(Duration::from_secs(2)));
        }
    }

    #[test]
    fn test_fixed_delay_gives_up_after_max_attempts() {
        let mut policy = FixedDelay::new(Duration::from_millis(10)).with_max_attempts(2);

        assert!(policy.next_delay(1).is_some());
        assert!(policy.next_delay(2).is_some());
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_exponential_doubles_until_cap() {
        // Arrange
        let mut policy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(1_000));

        // Act
        let delays: Vec<_> = (1..=6).map(|n| policy.next_delay(n).unwrap()).collect();

        // Assert
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
            ]
        );
    }

    #[test]
    fn test_exponential_huge_attempt_saturates_at_max() {
        let policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        // Arrange
        let mut policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(1))
            .with_jitter(0.5);

        // Act / Assert
        for attempt in 1..200 {
            let delay = policy.next_delay(attempt).unwrap();
            assert!(delay <= Duration::from_secs(1), "{delay:?} above base");
            assert!(delay >= Duration::from_millis(500), "{delay:?} below floor");
        }
    }

    #[test]
    fn test_jitter_produces_varied_delays() {
        let mut policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(1))
            .with_jitter(1.0);
        let delays: std::collections::HashSet<_> =
            (1..50).map(|n| policy.next_delay(n).unwrap()).collect();
        assert!(delays.len() > 1, "jittered delays should not all be equal");
    }

    #[test]
    fn test_exponential_max_attempts() {
        let mut policy =
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(10))
                .with_max_attempts(1);
        assert!(policy.next_delay(1).is_some());
        assert_eq!(policy.next_delay(2), None);
    }

    #[test]
    fn test_policy_from_default_config_is_two_second_fixed() {
        let mut policy = policy_from_config(&ReconnectConfig::default());
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(99), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_policy_from_exponential_config_respects_limit() {
        let mut policy = policy_from_config(&ReconnectConfig::Exponential {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(400),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: Some(3),
        });
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(4), None);
    }

    #[test]
    fn test_mock_policy_can_be_boxed() {
        // The client stores policies as trait objects; the mock must fit.
        let mut mock = MockReconnectPolicy::new();
        mock.expect_next_delay()
            .withf(|attempt| *attempt == 1)
            .times(1)
            .return_const(Some(Duration::from_millis(5)));

        let mut boxed: Box<dyn ReconnectPolicy> = Box::new(mock);
        assert_eq!(boxed.next_delay(1), Some(Duration::from_millis(5)));
    }
}
