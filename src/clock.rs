use std::time::Duration;
use tokio::time::Instant;

// Reads the tokio clock, so a paused test runtime fast-forwards contract lifetimes too.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    epoch: Instant,
    hour: Duration,
}

impl SimClock {
    pub fn new(hour: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            hour,
        }
    }

    /// Seconds since the clock was created.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Simulated seconds in `hours` contract hours.
    pub fn hours(&self, hours: f64) -> f64 {
        hours * self.hour.as_secs_f64()
    }

    pub fn hour(&self) -> Duration {
        self.hour
    }

    // Time left until an absolute clock reading, zero if already past and
    // Duration::MAX if it lies beyond what a Duration holds
    pub fn until(&self, at: f64) -> Duration {
        let left = at - self.now();
        if left > 0.0 {
            Duration::try_from_secs_f64(left).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clock_follows_tokio_time() {
        let clock = SimClock::new(Duration::from_secs(10));
        assert_eq!(clock.now(), 0.0);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!((clock.now() - 25.0).abs() < 1e-6);
        assert_eq!(clock.hours(2.5), 25.0);
    }

    #[tokio::test(start_paused = true)]
    async fn until_saturates_at_zero() {
        let clock = SimClock::new(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.until(3.0), Duration::ZERO);
        assert_eq!(clock.until(7.0), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn until_saturates_far_in_the_future() {
        let clock = SimClock::new(Duration::from_secs(3600));
        let end_time = clock.hours(1e300);

        assert_eq!(clock.until(end_time), Duration::MAX);
        assert_eq!(clock.until(f64::INFINITY), Duration::MAX);
    }
}
