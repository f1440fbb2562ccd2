//! Shaping rate limiter for the reshard stage.
//!
//! Delays, never drops: a second reshard arriving early waits out the
//! remainder of the interval before it is processed.

use std::time::Duration;

use tokio::time::Instant;

pub(crate) struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Wait until at least `interval` has passed since the previous
    /// acquisition. The first acquisition is immediate.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last {
            tokio::time::sleep_until(last + self.interval).await;
        }
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let mut throttle = Throttle::new(Duration::from_secs(60));
        let start = Instant::now();
        throttle.acquire().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_acquires_are_spaced_by_the_interval() {
        let interval = Duration::from_secs(60);
        let mut throttle = Throttle::new(interval);

        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        assert!(Instant::now() - start >= interval);

        throttle.acquire().await;
        assert!(Instant::now() - start >= interval * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn a_late_arrival_passes_straight_through() {
        let interval = Duration::from_secs(60);
        let mut throttle = Throttle::new(interval);

        throttle.acquire().await;
        tokio::time::sleep(interval * 2).await;

        let before = Instant::now();
        throttle.acquire().await;
        assert_eq!(Instant::now(), before);
    }
}
