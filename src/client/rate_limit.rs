//! Sliding-window rate limiter shared by every request a client issues.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub enabled: bool,
    pub requests_in_window: usize,
    pub limit: u32,
    /// Time until the oldest in-window request leaves the window.
    pub resets_in_ms: u64,
}

#[derive(Debug)]
struct WindowState {
    requests: VecDeque<Instant>,
    window_start: Instant,
}

impl WindowState {
    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.requests.front() {
            if now.duration_since(*oldest) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        if self.requests.is_empty() {
            self.window_start = now;
        }
    }
}

/// Admits at most `limit` requests in any trailing window.
///
/// `acquire` waits (asynchronously) instead of failing. The state mutex is released
/// before every sleep, so concurrent callers never block each other while waiting.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    enabled: bool,
    state: Mutex<WindowState>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            enabled: true,
            state: Mutex::new(WindowState {
                requests: VecDeque::new(),
                window_start: Instant::now(),
            }),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, DEFAULT_WINDOW)
    }

    /// A limiter that admits everything immediately.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::per_minute(u32::MAX)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Wait until a request may be admitted and record it. Returns the time spent waiting.
    pub async fn acquire(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let started = Instant::now();
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.evict(now, self.window);
                match state.requests.front() {
                    Some(oldest) if state.requests.len() >= self.limit as usize => {
                        (*oldest + self.window).saturating_duration_since(now)
                    }
                    _ => {
                        state.requests.push_back(now);
                        return now.duration_since(started);
                    }
                }
            };
            let wait = wait.max(Duration::from_millis(1));
            tracing::warn!("Rate limit reached ({} per {:?}), waiting {:?}", self.limit, self.window, wait);
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn stats(&self) -> RateLimitStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if self.enabled {
            state.evict(now, self.window);
        }
        let resets_in = state
            .requests
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or_default();
        RateLimitStats {
            enabled: self.enabled,
            requests_in_window: state.requests.len(),
            limit: self.limit,
            resets_in_ms: resets_in.as_millis() as u64,
        }
    }

    /// Start of the current window: the oldest admitted request still inside it.
    pub async fn window_start(&self) -> Instant {
        let state = self.state.lock().await;
        state.requests.front().copied().unwrap_or(state.window_start)
    }
}
