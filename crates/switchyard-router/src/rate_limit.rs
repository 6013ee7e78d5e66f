//! Per-model sliding-window admission control

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default window length
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window rate limiter keyed by model id
///
/// Each key keeps the admission timestamps of the last window. Check and
/// record happen under the key's shard lock, so concurrent callers can never
/// admit more than `limit` requests per window.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Limiter with a 60 second window
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Limiter with a custom window
    #[must_use]
    pub fn with_window(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window,
        }
    }

    /// Admit one request for `model_id` or fail with [`Error::RateLimited`]
    pub fn check_admit(&self, model_id: &str, limit: u32) -> Result<()> {
        let now = Instant::now();
        let mut window = self.windows.entry(model_id.to_string()).or_default();

        while window
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            window.pop_front();
        }

        if window.len() >= limit as usize {
            debug!(model = %model_id, limit, "Rate limit reached");
            return Err(Error::RateLimited {
                model: model_id.to_string(),
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Admissions within the current window
    #[must_use]
    pub fn current_usage(&self, model_id: &str) -> usize {
        let now = Instant::now();
        self.windows.get(model_id).map_or(0, |window| {
            window
                .iter()
                .filter(|t| now.saturating_duration_since(**t) < self.window)
                .count()
        })
    }

    /// Forget one model's window, or all of them
    pub fn reset(&self, model_id: Option<&str>) {
        match model_id {
            Some(id) => {
                self.windows.remove(id);
            }
            None => self.windows.clear(),
        }
    }
}
