//! Sliding-window rate limiter (C2).
//!
//! One shard, guarded by an async mutex so `acquire` may sleep while
//! holding it — callers are already serialised by the event loop, so
//! there is no contention to optimise away.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct State {
    timestamps: VecDeque<Instant>,
    wait_until: Option<Instant>,
}

/// A sliding-window limiter: at most `max_requests` acquisitions in
/// any trailing `window` of time.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(State {
                timestamps: VecDeque::new(),
                wait_until: None,
            }),
        }
    }

    /// The metadata/gamma-API limiter: ~70% of the documented 300
    /// req/10s limit.
    pub fn metadata() -> Self {
        Self::new(200, Duration::from_secs(10))
    }

    /// The CLOB read limiter (order books, prices): ~70% of the
    /// documented 1500 req/10s limit.
    pub fn clob_read() -> Self {
        Self::new(1000, Duration::from_secs(10))
    }

    /// The write-class (CLOB trade/order) limiter: ~70% of the
    /// documented ~570 req/10s limit.
    pub fn clob_write() -> Self {
        Self::new(400, Duration::from_secs(10))
    }

    /// Block until a slot is available, then record the acquisition.
    pub async fn acquire(&self) {
        loop {
            let sleep_for = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                if let Some(until) = state.wait_until {
                    if now < until {
                        Some(until - now)
                    } else {
                        state.wait_until = None;
                        None
                    }
                } else {
                    None
                }
            };
            if let Some(d) = sleep_for {
                tokio::time::sleep(d).await;
                continue;
            }

            let sleep_for = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let cutoff = now - self.window;
                while matches!(state.timestamps.front(), Some(ts) if *ts < cutoff) {
                    state.timestamps.pop_front();
                }

                if state.timestamps.len() >= self.max_requests {
                    let oldest = *state.timestamps.front().expect("len >= max_requests > 0");
                    Some((oldest + self.window).saturating_duration_since(now))
                } else {
                    state.timestamps.push_back(now);
                    None
                }
            };

            match sleep_for {
                Some(d) if d > Duration::ZERO => tokio::time::sleep(d).await,
                _ => return,
            }
        }
    }

    /// Record an upstream response; on a 429 with a `Retry-After` hint
    /// (in seconds), extend the wait point to at least that long from
    /// now.
    pub async fn record_response(&self, status: u16, retry_after_secs: Option<u64>) {
        if status != 429 {
            return;
        }
        let delay = Duration::from_secs(retry_after_secs.unwrap_or(1));
        let mut state = self.state.lock().await;
        let candidate = Instant::now() + delay;
        state.wait_until = Some(match state.wait_until {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_without_delay() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn record_response_ignores_non_429() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        limiter.record_response(500, Some(5)).await;
        let state = limiter.state.lock().await;
        assert!(state.wait_until.is_none());
    }

    #[tokio::test]
    async fn record_response_sets_wait_point_on_429() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        limiter.record_response(429, Some(1)).await;
        let state = limiter.state.lock().await;
        assert!(state.wait_until.is_some());
    }
}
