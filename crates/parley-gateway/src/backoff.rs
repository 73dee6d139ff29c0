use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::GatewayError;

/// Exponential backoff: the delay after attempt `n` (0-based) is
/// `min(base * 2^n, ceiling)`, plus up to 25% random jitter when enabled.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base: Duration,
    pub ceiling: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            ceiling: Duration::from_secs(30),
            max_attempts: 8,
            jitter: true,
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self.base.saturating_mul(factor).min(self.ceiling);

        if !self.jitter || capped.is_zero() {
            return capped;
        }

        let spread = (capped.as_millis() / 4) as u64;
        let extra = rand::rng().random_range(0..=spread);
        capped + Duration::from_millis(extra)
    }

    /// Runs `op` until it succeeds or the attempt budget is spent, sleeping
    /// between failures.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last = GatewayError::Shutdown;

        for attempt in 0..attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{} attempt {}/{} failed: {}", what, attempt + 1, attempts, e);
                    last = e;
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.delay(attempt)).await;
            }
        }

        Err(GatewayError::Exhausted {
            attempts,
            last: Box::new(last),
        })
    }
}
