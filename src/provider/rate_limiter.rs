// Sliding-window rate limiter with stacked tiers.
//
// Each tier tracks request timestamps in its window; an acquire must fit
// every tier at the same instant. On a partial fit the timestamps already
// recorded are rolled back so a blocked request consumes no quota.

use crate::errors::ProviderError;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Tier {
    name: &'static str,
    max_requests: usize,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl Tier {
    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the oldest timestamp leaves the window.
    fn retry_after(&self, now: Instant) -> Duration {
        match self.timestamps.front() {
            Some(&front) => self.window.saturating_sub(now.duration_since(front)),
            None => Duration::ZERO,
        }
    }
}

pub struct RateLimiter {
    tiers: Mutex<Vec<Tier>>,
}

impl RateLimiter {
    /// Per-second and per-minute tiers, the shape provider APIs meter on.
    pub fn new(per_second: usize, per_minute: usize) -> Self {
        Self {
            tiers: Mutex::new(vec![
                Tier {
                    name: "per-second",
                    max_requests: per_second,
                    window: Duration::from_secs(1),
                    timestamps: VecDeque::new(),
                },
                Tier {
                    name: "per-minute",
                    max_requests: per_minute,
                    window: Duration::from_secs(60),
                    timestamps: VecDeque::new(),
                },
            ]),
        }
    }

    /// Try to take one slot across all tiers. Returns the limiting tier's
    /// name and suggested wait on failure.
    fn try_acquire(&self) -> Result<(), (&'static str, Duration)> {
        let mut tiers = self.tiers.lock().unwrap();
        let now = Instant::now();

        let mut acquired = 0;
        let mut blocked: Option<(&'static str, Duration)> = None;
        for tier in tiers.iter_mut() {
            tier.prune(now);
            if tier.timestamps.len() < tier.max_requests {
                tier.timestamps.push_back(now);
                acquired += 1;
            } else {
                blocked = Some((tier.name, tier.retry_after(now)));
                break;
            }
        }

        match blocked {
            None => Ok(()),
            Some(limit) => {
                // Roll back the tiers that did admit us.
                for tier in tiers.iter_mut().take(acquired) {
                    tier.timestamps.pop_back();
                }
                Err(limit)
            }
        }
    }

    /// Wait until a slot is free in every tier, up to `timeout` of total
    /// waiting.
    pub async fn acquire(&self, timeout: Duration) -> Result<(), ProviderError> {
        let start = Instant::now();
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err((tier, retry_after)) => {
                    let waited = start.elapsed();
                    if waited + retry_after > timeout {
                        return Err(ProviderError::RateLimited {
                            limiter: tier.to_string(),
                            waited_secs: waited.as_secs_f64(),
                        });
                    }
                    log::debug!(
                        "Rate limited by {} tier, waiting {:?}",
                        tier,
                        retry_after
                    );
                    tokio::time::sleep(retry_after.max(Duration::from_millis(50))).await;
                }
            }
        }
    }

    /// In-window request count per tier, oldest tier first.
    pub fn usage(&self) -> Vec<(String, usize, usize)> {
        let mut tiers = self.tiers.lock().unwrap();
        let now = Instant::now();
        tiers
            .iter_mut()
            .map(|tier| {
                tier.prune(now);
                (tier.name.to_string(), tier.timestamps.len(), tier.max_requests)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_tier_limit() {
        let limiter = RateLimiter::new(2, 50);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
        let err = limiter.try_acquire();
        assert!(matches!(err, Err(("per-second", _))));
    }

    #[test]
    fn blocked_acquire_consumes_no_quota() {
        let limiter = RateLimiter::new(5, 2);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
        // Per-minute tier is full; the per-second slot taken on this
        // attempt must be returned.
        assert!(limiter.try_acquire().is_err());

        let usage = limiter.usage();
        assert_eq!(usage[0].1, 2);
        assert_eq!(usage[1].1, 2);
    }

    #[tokio::test]
    async fn acquire_times_out_with_tier_name() {
        let limiter = RateLimiter::new(1, 1);
        limiter.acquire(Duration::from_secs(5)).await.unwrap();

        let err = limiter.acquire(Duration::from_millis(10)).await;
        match err {
            Err(ProviderError::RateLimited { limiter, .. }) => {
                assert_eq!(limiter, "per-second");
            }
            other => panic!("expected rate limit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn acquire_succeeds_after_window_rolls() {
        let limiter = RateLimiter::new(1, 50);
        limiter.acquire(Duration::from_secs(5)).await.unwrap();
        // Second acquire has to wait out the one-second window.
        limiter.acquire(Duration::from_secs(5)).await.unwrap();
        let usage = limiter.usage();
        assert_eq!(usage[0].1, 1);
    }
}
