use crate::endpoint::Endpoint;
use crate::{Error, Result};
use ringbuffer::{AllocRingBuffer, RingBuffer};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

const SHORT_RANGE_CALLS: usize = 1;
const SHORT_RANGE_PERIOD: Duration = Duration::from_secs(3);
const PER_MINUTE_CALLS: usize = 15;
const PER_MINUTE_PERIOD: Duration = Duration::from_secs(60);

const MAX_TRIES: u32 = 8;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(64);

/// Sliding window of the last `limit` call instants.
pub(crate) struct RateLimiter {
    times: AllocRingBuffer<Instant>,
    limit: usize,
    period: Duration,
}

impl RateLimiter {
    pub(crate) fn new(limit: usize, period: Duration) -> Self {
        Self {
            times: AllocRingBuffer::new(limit),
            limit,
            period,
        }
    }

    /// How long until this window admits another call, `None` if it does now.
    pub(crate) fn wait_time(&self, now: Instant) -> Option<Duration> {
        if self.times.len() < self.limit {
            return None;
        }

        let oldest = *self.times.get(0)?;
        let next_slot = oldest + self.period;

        if now >= next_slot {
            None
        } else {
            Some(next_slot - now)
        }
    }

    /// Full buffers drop their oldest instant.
    pub(crate) fn record(&mut self, now: Instant) {
        self.times.push(now);
    }
}

/// Every window must admit a call before it goes out. A caller that is turned
/// away backs off exponentially and gives up after a bounded number of tries.
pub struct Limiter {
    windows: Mutex<Vec<RateLimiter>>,
    max_tries: u32,
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(&[
            (SHORT_RANGE_CALLS, SHORT_RANGE_PERIOD),
            (PER_MINUTE_CALLS, PER_MINUTE_PERIOD),
        ])
    }
}

impl Limiter {
    pub fn new(windows: &[(usize, Duration)]) -> Self {
        Self {
            windows: Mutex::new(
                windows
                    .iter()
                    .map(|&(limit, period)| RateLimiter::new(limit, period))
                    .collect(),
            ),
            max_tries: MAX_TRIES,
        }
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries.max(1);
        self
    }

    async fn try_acquire(&self) -> Option<Duration> {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();

        let wait = windows.iter().filter_map(|w| w.wait_time(now)).max();
        if wait.is_none() {
            windows.iter_mut().for_each(|w| w.record(now));
        }
        wait
    }

    fn backoff(attempt: u32) -> Duration {
        BASE_BACKOFF
            .saturating_mul(1 << attempt.min(16))
            .min(MAX_BACKOFF)
    }

    pub async fn acquire(&self, endpoint: Endpoint) -> Result<()> {
        if !endpoint.is_rate_limited() {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            let Some(wait) = self.try_acquire().await else {
                return Ok(());
            };

            attempt += 1;
            if attempt >= self.max_tries {
                return Err(Error::RateLimited(endpoint));
            }

            let delay = wait.max(Self::backoff(attempt - 1)).min(MAX_BACKOFF);
            log::debug!("Rate limited on {endpoint}, retrying in {delay:?} (attempt {attempt})");
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_admits_up_to_limit() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(1));
        let now = Instant::now();

        assert_eq!(limiter.wait_time(now), None);
        limiter.record(now);
        assert_eq!(limiter.wait_time(now), None);
        limiter.record(now);

        assert_eq!(limiter.wait_time(now), Some(Duration::from_secs(1)));
        assert_eq!(
            limiter.wait_time(now + Duration::from_millis(400)),
            Some(Duration::from_millis(600))
        );
        assert_eq!(limiter.wait_time(now + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        limiter.record(start);
        limiter.record(start + Duration::from_secs(4));
        assert!(limiter.wait_time(start + Duration::from_secs(5)).is_some());

        limiter.record(start + Duration::from_secs(10));
        // oldest is now the call at +4s
        assert_eq!(
            limiter.wait_time(start + Duration::from_secs(11)),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(Limiter::backoff(0), Duration::from_secs(1));
        assert_eq!(Limiter::backoff(3), Duration::from_secs(8));
        assert_eq!(Limiter::backoff(10), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_window() {
        let limiter = Limiter::new(&[(1, Duration::from_secs(3))]);
        let start = Instant::now();

        limiter.acquire(Endpoint::PriceOverview).await.unwrap();
        limiter.acquire(Endpoint::PriceOverview).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_gives_up() {
        let limiter = Limiter::new(&[(1, Duration::from_secs(1000))]).with_max_tries(2);

        limiter.acquire(Endpoint::SellItem).await.unwrap();
        let result = limiter.acquire(Endpoint::SellItem).await;

        assert!(matches!(result, Err(Error::RateLimited(Endpoint::SellItem))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inventory_is_not_limited() {
        let limiter = Limiter::new(&[(1, Duration::from_secs(3))]);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire(Endpoint::Inventory).await.unwrap();
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_limits() {
        let limiter = Limiter::default();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire(Endpoint::MyListings).await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_secs(6));
    }
}
