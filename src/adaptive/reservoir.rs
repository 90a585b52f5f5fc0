//! Rolling latency distribution.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Most recent samples kept
pub const DEFAULT_MAX_SAMPLES: usize = 1028;

/// Samples older than this are dropped
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Bounded window of recent latency samples, in milliseconds
#[derive(Debug, Clone)]
pub struct LatencyReservoir {
    samples: VecDeque<(Instant, f64)>,
    max_samples: usize,
    max_age: Duration,
}

impl Default for LatencyReservoir {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SAMPLES, DEFAULT_MAX_AGE)
    }
}

impl LatencyReservoir {
    pub fn new(max_samples: usize, max_age: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
            max_age,
        }
    }

    /// Record one request latency
    pub fn update(&mut self, latency: Duration, now: Instant) {
        self.prune(now);
        self.samples.push_back((now, latency.as_secs_f64() * 1000.0));

        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Percentile (0.0..=1.0) of the live samples in milliseconds, 0 when empty
    pub fn percentile(&mut self, p: f64, now: Instant) -> f64 {
        self.prune(now);

        let mut values: Vec<f64> = self.samples.iter().map(|(_, ms)| *ms).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        interpolate(&values, p)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        while let Some((recorded, _)) = self.samples.front() {
            if now.saturating_duration_since(*recorded) > self.max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Linear interpolation at rank `p * (n + 1)` over sorted values
fn interpolate(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let n = sorted.len() as f64;
    let pos = p * (n + 1.0);
    if pos < 1.0 {
        sorted[0]
    } else if pos >= n {
        sorted[sorted.len() - 1]
    } else {
        let lower = sorted[pos as usize - 1];
        let upper = sorted[pos as usize];
        lower + (pos - pos.floor()) * (upper - lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_reservoir() {
        let mut reservoir = LatencyReservoir::default();
        assert!(reservoir.is_empty());
        assert_eq!(reservoir.percentile(0.95, Instant::now()), 0.0);
    }

    #[test]
    fn test_p95_interpolates() {
        let now = Instant::now();
        let mut reservoir = LatencyReservoir::default();
        for ms in (1..=100).rev() {
            reservoir.update(Duration::from_millis(ms), now);
        }
        let p95 = reservoir.percentile(0.95, now);
        assert!((p95 - 95.95).abs() < 1e-9, "p95 was {}", p95);
    }

    #[test]
    fn test_single_sample() {
        let now = Instant::now();
        let mut reservoir = LatencyReservoir::default();
        reservoir.update(Duration::from_millis(800), now);
        assert!((reservoir.percentile(0.95, now) - 800.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounded_by_sample_count() {
        let now = Instant::now();
        let mut reservoir = LatencyReservoir::new(10, DEFAULT_MAX_AGE);
        for ms in 0..50 {
            reservoir.update(Duration::from_millis(ms), now);
        }
        assert_eq!(reservoir.len(), 10);
        // Only 40..50 remain
        assert!(reservoir.percentile(0.0, now) >= 40.0);
    }

    #[test]
    fn test_old_samples_expire() {
        let start = Instant::now();
        let mut reservoir = LatencyReservoir::new(100, Duration::from_secs(10));
        reservoir.update(Duration::from_millis(900), start);
        reservoir.update(Duration::from_millis(10), start + Duration::from_secs(8));

        let later = start + Duration::from_secs(11);
        assert!((reservoir.percentile(0.95, later) - 10.0).abs() < 1e-9);
        assert_eq!(reservoir.len(), 1);
    }
}
