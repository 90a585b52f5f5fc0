//! One-minute exponentially weighted rate meter.

use std::time::{Duration, Instant};

/// Interval between EWMA ticks
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Events per second, smoothed over roughly one minute
///
/// Ticks are applied lazily when the meter is marked or read, so no
/// background task is needed. Until the first tick has elapsed the rate is 0.
#[derive(Debug, Clone)]
pub struct Meter {
    /// Events since the last tick
    uncounted: u64,
    /// Events since creation
    count: u64,
    /// Smoothed events per second
    rate: f64,
    initialized: bool,
    last_tick: Instant,
    alpha: f64,
}

impl Meter {
    pub fn new(now: Instant) -> Self {
        Self {
            uncounted: 0,
            count: 0,
            rate: 0.0,
            initialized: false,
            last_tick: now,
            alpha: 1.0 - (-TICK_INTERVAL.as_secs_f64() / 60.0).exp(),
        }
    }

    /// Record `n` events at `now`
    pub fn mark(&mut self, n: u64, now: Instant) {
        self.tick_until(now);
        self.uncounted += n;
        self.count += n;
    }

    /// Smoothed one-minute rate as of `now`
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.tick_until(now);
        self.rate
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn tick_until(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        let ticks = (elapsed.as_nanos() / TICK_INTERVAL.as_nanos()) as u32;
        if ticks == 0 {
            return;
        }

        self.tick();
        // Every further tick saw no events, so it only decays the rate
        if ticks > 1 {
            self.rate *= (1.0 - self.alpha).powi(ticks as i32 - 1);
        }
        self.last_tick += TICK_INTERVAL * ticks;
    }

    fn tick(&mut self) {
        let instant_rate = self.uncounted as f64 / TICK_INTERVAL.as_secs_f64();
        self.uncounted = 0;

        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }
}
