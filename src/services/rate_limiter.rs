use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter in front of the mail provider. When the window is
/// full the caller sleeps until the oldest timestamp ages out.
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    stamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self { max_per_window: max_per_window.max(1), window, stamps: Mutex::new(VecDeque::new()) }
    }

    /// Default provider budget: 14 requests per sliding second.
    pub fn per_second(max_per_second: usize) -> Self {
        Self::new(max_per_second, Duration::from_secs(1))
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.stamps.lock().await;
                let now = Instant::now();
                while let Some(&front) = stamps.front() {
                    if now.duration_since(front) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }
                if stamps.len() < self.max_per_window {
                    stamps.push_back(now);
                    return;
                }
                // Window full; sleep until the oldest stamp leaves it.
                self.window - now.duration_since(*stamps.front().unwrap())
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_under_limit_is_immediate() {
        let limiter = RateLimiter::per_second(5);
        let started = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_over_limit_waits_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        // Third call must wait out the sliding window.
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
