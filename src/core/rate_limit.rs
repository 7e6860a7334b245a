use crate::utils::error::{EtlError, Result};
use governor::{DefaultDirectRateLimiter, Quota};
use std::num::NonZeroU32;
use std::time::Duration;

/// Paces outbound calls to at most `max_calls_per_second`, averaged over time.
/// Safe to share between tasks.
pub struct RateLimiter {
    limiter: DefaultDirectRateLimiter,
    max_calls_per_second: f64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_calls_per_second", &self.max_calls_per_second)
            .finish()
    }
}

impl RateLimiter {
    pub fn per_second(max_calls_per_second: f64) -> Result<Self> {
        if !max_calls_per_second.is_finite() || max_calls_per_second <= 0.0 {
            return Err(invalid_rate(max_calls_per_second, "Value must be a positive number"));
        }

        // 每個 permit 之間的固定間隔，burst 為 1 以平滑分布請求
        let period = Duration::try_from_secs_f64(1.0 / max_calls_per_second)
            .map_err(|_| invalid_rate(max_calls_per_second, "Value is too small"))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| EtlError::config("max_calls_per_second is too large"))?
            .allow_burst(NonZeroU32::MIN);

        Ok(Self {
            limiter: governor::RateLimiter::direct(quota),
            max_calls_per_second,
        })
    }

    pub fn max_calls_per_second(&self) -> f64 {
        self.max_calls_per_second
    }

    /// Waits until a call permit is available.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

fn invalid_rate(max_calls_per_second: f64, reason: &str) -> EtlError {
    EtlError::InvalidConfigValueError {
        field: "transform.max_calls_per_second".to_string(),
        value: max_calls_per_second.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn rejects_non_positive_rates() {
        assert!(RateLimiter::per_second(0.0).is_err());
        assert!(RateLimiter::per_second(-1.0).is_err());
        assert!(RateLimiter::per_second(f64::NAN).is_err());
    }

    #[test]
    fn rejects_rates_whose_period_overflows() {
        assert!(matches!(
            RateLimiter::per_second(1e-20),
            Err(EtlError::InvalidConfigValueError { field, .. }) if field == "transform.max_calls_per_second"
        ));
    }

    #[tokio::test]
    async fn spaces_calls_by_the_configured_rate() {
        let limiter = RateLimiter::per_second(20.0).unwrap();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        // first permit is immediate, the next two are 50ms apart
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn fractional_rates_are_accepted() {
        let limiter = RateLimiter::per_second(0.5).unwrap();
        assert_eq!(limiter.max_calls_per_second(), 0.5);
        limiter.acquire().await;
    }
}
