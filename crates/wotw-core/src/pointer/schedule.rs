//! Time source and throttling for resolution and verification

#[cfg(test)]
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

#[cfg(test)]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Gate that opens again once a deadline has passed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throttle {
    next: Option<Instant>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.next.is_none_or(|next| now >= next)
    }

    /// Close the gate for `interval` starting at `now`
    pub fn defer(&mut self, now: Instant, interval: Duration) {
        self.next = Some(now + interval);
    }

    pub fn reset(&mut self) {
        self.next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_starts_open() {
        let clock = ManualClock::new();
        assert!(Throttle::new().is_ready(clock.now()));
    }

    #[test]
    fn test_throttle_defers_until_interval_elapsed() {
        let clock = ManualClock::new();
        let mut throttle = Throttle::new();
        throttle.defer(clock.now(), Duration::from_secs(1));
        assert!(!throttle.is_ready(clock.now()));

        clock.advance(Duration::from_millis(999));
        assert!(!throttle.is_ready(clock.now()));

        clock.advance(Duration::from_millis(1));
        assert!(throttle.is_ready(clock.now()));
    }

    #[test]
    fn test_throttle_reset() {
        let clock = ManualClock::new();
        let mut throttle = Throttle::new();
        throttle.defer(clock.now(), Duration::from_secs(60));
        throttle.reset();
        assert!(throttle.is_ready(clock.now()));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let first = clock.now();
        assert!(clock.now() >= first);
    }
}
