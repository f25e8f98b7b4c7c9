//! Exponential backoff with multiplicative jitter.

use std::time::Duration;

use rand::Rng;

use crate::error::ConfigError;

/// Immutable backoff schedule shared read-only by all attempts of one
/// operation.
///
/// `delay(n) = clamp(min(base * growth^n, max) * U(1 - jitter, 1 + jitter), base, max)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    growth: f64,
    jitter: f64,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            growth: 2.0,
            jitter: 0.2,
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Validate and build a schedule.
    ///
    /// `base` must be non-zero, `growth` finite and at least 1, `jitter`
    /// within `[0, 1]`, and `max` no smaller than `base`.
    pub fn new(
        base: Duration,
        growth: f64,
        jitter: f64,
        max: Duration,
    ) -> Result<Self, ConfigError> {
        if base.is_zero() {
            return Err(ConfigError::invalid("backoff base delay", "must be non-zero"));
        }
        if !growth.is_finite() || growth < 1.0 {
            return Err(ConfigError::invalid(
                "backoff growth",
                format!("{} (must be a finite factor >= 1)", growth),
            ));
        }
        if !jitter.is_finite() || !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::invalid(
                "backoff jitter",
                format!("{} (must be within 0..=1)", jitter),
            ));
        }
        if max < base {
            return Err(ConfigError::invalid(
                "backoff max delay",
                format!("{:?} is below the base delay {:?}", max, base),
            ));
        }
        Ok(Self {
            base,
            growth,
            jitter,
            max,
        })
    }

    /// Fixed non-zero delay, no growth or jitter.
    pub fn constant(delay: Duration) -> Result<Self, ConfigError> {
        Self::new(delay, 1.0, 0.0, delay)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay to sleep after the failed attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.base.as_nanos() as f64;
        let max = self.max.as_nanos() as f64;
        // growth^n overflows to +inf for large n; min() brings it back to max.
        let capped = (base * self.growth.powi(exponent)).min(max);
        let factor = if self.jitter == 0.0 {
            1.0
        } else {
            rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        };
        from_nanos((capped * factor).clamp(base, max))
    }
}

fn from_nanos(nanos: f64) -> Duration {
    Duration::from_nanos(nanos.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn policy(base_ms: u64, growth: f64, jitter: f64, max_ms: u64) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(base_ms),
            growth,
            jitter,
            Duration::from_millis(max_ms),
        )
        .unwrap()
    }

    #[test]
    fn test_exponential_without_jitter() {
        let p = policy(100, 2.0, 0.0, 10_000);
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(800));
        assert_eq!(p.delay(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_huge_attempt_is_capped() {
        let p = policy(100, 3.0, 0.0, 5_000);
        assert_eq!(p.delay(u32::MAX), Duration::from_millis(5_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = policy(200, 1.7, 0.5, 4_000);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..40 {
            for _ in 0..50 {
                let d = p.delay_with(attempt, &mut rng);
                assert!(d <= p.max(), "attempt {} gave {:?}", attempt, d);
                assert!(d >= p.base(), "attempt {} gave {:?}", attempt, d);
            }
        }
    }

    #[test]
    fn test_jitter_actually_varies() {
        let p = policy(1_000, 2.0, 0.3, 60_000);
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<Duration> = (0..20).map(|_| p.delay_with(3, &mut rng)).collect();
        assert!(samples.iter().any(|d| *d != samples[0]));
        for d in samples {
            assert!(d >= Duration::from_millis(5_600) && d <= Duration::from_millis(10_400));
        }
    }

    #[test]
    fn test_constant() {
        let p = BackoffPolicy::constant(Duration::from_millis(250)).unwrap();
        assert_eq!(p.delay(0), Duration::from_millis(250));
        assert_eq!(p.delay(9), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_base_rejected() {
        assert!(matches!(
            BackoffPolicy::new(Duration::ZERO, 2.0, 0.5, Duration::from_secs(1)),
            Err(ConfigError::Invalid {
                field: "backoff base delay",
                ..
            })
        ));
        assert!(BackoffPolicy::constant(Duration::ZERO).is_err());
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let ms = Duration::from_millis;
        assert!(BackoffPolicy::new(ms(100), -1.0, 0.1, ms(1_000)).is_err());
        assert!(BackoffPolicy::new(ms(100), 0.5, 0.1, ms(1_000)).is_err());
        assert!(BackoffPolicy::new(ms(100), f64::NAN, 0.1, ms(1_000)).is_err());
        assert!(BackoffPolicy::new(ms(100), 2.0, -0.1, ms(1_000)).is_err());
        assert!(BackoffPolicy::new(ms(100), 2.0, 1.5, ms(1_000)).is_err());
        assert!(BackoffPolicy::new(ms(100), 2.0, 0.1, ms(50)).is_err());
        assert!(matches!(
            BackoffPolicy::new(ms(100), 2.0, 2.0, ms(1_000)),
            Err(ConfigError::Invalid {
                field: "backoff jitter",
                ..
            })
        ));
    }
}
