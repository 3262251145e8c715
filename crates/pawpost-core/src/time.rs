//! Time abstractions for testable retry timing.
//!
//! The dispatcher sleeps between delivery attempts and timestamps every
//! observability event. Both go through `Clock` so tests can run the full
//! retry schedule instantly and assert on the delays that were requested.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// Clock abstraction for time operations.
///
/// Production code uses `RealClock`, tests inject `TestClock`.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time for event timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real clock backed by the system clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` advances virtual time immediately and records the requested
/// duration, then yields so other tasks make progress. Clones share state.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl TestClock {
    /// Creates a test clock starting at the current time.
    pub fn new() -> Self {
        Self::with_start_time(Utc::now())
    }

    /// Creates a test clock starting at a specific wall-clock time.
    pub fn with_start_time(start: DateTime<Utc>) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            base_instant: Instant::now(),
            base_utc: start,
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Advances virtual time without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Returns virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }

    /// Returns every duration passed to `sleep`, in call order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|sleeps| sleeps.clone()).unwrap_or_default()
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let elapsed =
            chrono::Duration::from_std(self.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.base_utc + elapsed
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(10));

        assert_eq!(clock.now().duration_since(start), Duration::from_secs(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        assert!(clock.recorded_sleeps().is_empty());
    }

    #[test]
    fn test_clock_wall_time_follows_virtual_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = TestClock::with_start_time(start);

        assert_eq!(clock.now_utc(), start);

        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.now_utc(), start + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_clock_sleep_is_instant_and_recorded() {
        let clock = TestClock::new();
        let wall_start = Instant::now();

        clock.sleep(Duration::from_secs(2)).await;
        clock.sleep(Duration::from_secs(2)).await;

        assert!(wall_start.elapsed() < Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(4));
        assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(2); 2]);
    }

    #[test]
    fn clones_share_state() {
        let clock = TestClock::new();
        let clone = clock.clone();

        clone.advance(Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn real_clock_sleeps() {
        let clock = RealClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now().duration_since(start) >= Duration::from_millis(5));
    }
}
