use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::LOW_QUOTA_RATIO;
use crate::context::CallContext;
use crate::errors::AnnotationError;
use crate::models::RateWindow;

/// Outcome of comparing the provider's advertised quota to its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaStatus {
    Healthy,
    Low { remaining: u64, limit: u64 },
}

/// Fixed-window limiter shared by every caller of one client.
pub struct RateLimiter {
    window: Mutex<RateWindow>,
    window_len: Duration,
    last_quota: StdMutex<Option<QuotaStatus>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window_len: Duration) -> Self {
        Self {
            window: Mutex::new(RateWindow::new(limit.max(1))),
            window_len,
            last_quota: StdMutex::new(None),
        }
    }

    pub fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    /// Waits until a slot is free in the current window and claims it.
    ///
    /// Only fails when `ctx` is cancelled or its deadline passes.
    pub async fn acquire(&self, ctx: &CallContext) -> Result<(), AnnotationError> {
        loop {
            ctx.check()?;

            let wait = {
                let mut window = ctx.run(self.window.lock()).await?;
                let now = Instant::now();
                if now.duration_since(window.window_start) >= self.window_len {
                    window.window_start = now;
                    window.count = 0;
                }

                if window.count < window.limit {
                    window.count += 1;
                    return Ok(());
                }

                (window.window_start + self.window_len).saturating_duration_since(now)
            };

            debug!("Rate limit window full, waiting {}ms", wait.as_millis());
            ctx.sleep(wait).await?;
        }
    }

    /// Advisory check of `X-RateLimit-Remaining` against `X-RateLimit-Limit`.
    pub fn observe_response_headers(&self, remaining: u64, limit: u64) -> QuotaStatus {
        let status = if limit > 0 && (remaining as f64) < (limit as f64) * LOW_QUOTA_RATIO {
            warn!(
                "Upstream quota running low: {} of {} requests remaining",
                remaining, limit
            );
            QuotaStatus::Low { remaining, limit }
        } else {
            QuotaStatus::Healthy
        };
        *self
            .last_quota
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(status);
        status
    }

    /// Status from the most recent response that carried quota headers.
    pub fn last_quota(&self) -> Option<QuotaStatus> {
        *self
            .last_quota
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn window_count(&self) -> u32 {
        let window = self.window.lock().await;
        if window.window_start.elapsed() >= self.window_len {
            0
        } else {
            window.count
        }
    }
}
