//! Adjustment-factor model for the adaptive limiter.
//!
//! Every function here is pure so the model can be checked against fixed
//! metric inputs and a fixed hour of day.

use super::types::{AdaptiveParameters, MetricsSnapshot};
use std::f64::consts::PI;

/// Lower bound of every individual factor and of the output relative to the baseline
pub const MIN_FACTOR: f64 = 0.5;

/// Upper bound of the output relative to the baseline
pub const MAX_FACTOR: f64 = 1.5;

/// Latency at or above which the latency factor bottoms out
pub const LATENCY_CEILING_MS: f64 = 1000.0;

/// Peaks at 1.5 at 18:00, 1.0 at noon and midnight, bottoms at 0.5 at 06:00
pub fn time_of_day_factor(hour: u32) -> f64 {
    1.0 + 0.5 * ((hour as f64 - 12.0) * PI / 12.0).sin()
}

pub fn cpu_factor(cpu_usage_percent: f64) -> f64 {
    MIN_FACTOR.max(1.0 - cpu_usage_percent / 100.0)
}

pub fn latency_factor(latency_p95_ms: f64) -> f64 {
    let normalized = latency_p95_ms.min(LATENCY_CEILING_MS) / LATENCY_CEILING_MS;
    MIN_FACTOR.max(1.0 - normalized)
}

pub fn error_factor(error_rate: f64) -> f64 {
    MIN_FACTOR.max(1.0 - error_rate)
}

/// Product of the time-of-day and load factors
pub fn adjustment_factor(snapshot: &MetricsSnapshot, hour: u32) -> f64 {
    time_of_day_factor(hour)
        * cpu_factor(snapshot.cpu_usage_percent)
        * latency_factor(snapshot.latency_p95_ms)
        * error_factor(snapshot.error_rate)
}

/// New rate and capacity for one control cycle
///
/// Both outputs are clamped to `[0.5, 1.5]` times the given baseline.
pub fn compute_limits(
    snapshot: &MetricsSnapshot,
    baseline: &AdaptiveParameters,
    hour: u32,
) -> AdaptiveParameters {
    let adjustment = adjustment_factor(snapshot, hour);

    let rate = clamp_to_baseline(baseline.rate * adjustment, baseline.rate);

    let request_rate_factor = 1.0f64.max(snapshot.request_rate / baseline.rate);
    let capacity = clamp_to_baseline(
        baseline.capacity * request_rate_factor * adjustment,
        baseline.capacity,
    );

    AdaptiveParameters { rate, capacity }
}

fn clamp_to_baseline(value: f64, baseline: f64) -> f64 {
    (baseline * MIN_FACTOR).max((baseline * MAX_FACTOR).min(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f64, latency: f64, errors: f64, requests: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            cpu_usage_percent: cpu,
            latency_p95_ms: latency,
            error_rate: errors,
            request_rate: requests,
        }
    }

    #[test]
    fn test_time_of_day_factor() {
        assert!((time_of_day_factor(12) - 1.0).abs() < 1e-12);
        assert!((time_of_day_factor(0) - 1.0).abs() < 1e-12);
        assert!((time_of_day_factor(18) - 1.5).abs() < 1e-12);
        assert!((time_of_day_factor(6) - 0.5).abs() < 1e-12);
        for hour in 0..24 {
            let factor = time_of_day_factor(hour);
            assert!((0.5..=1.5).contains(&factor));
        }
    }

    #[test]
    fn test_individual_factors() {
        assert_eq!(cpu_factor(0.0), 1.0);
        assert_eq!(cpu_factor(90.0), MIN_FACTOR);
        assert!((cpu_factor(30.0) - 0.7).abs() < 1e-12);

        assert_eq!(latency_factor(0.0), 1.0);
        assert!((latency_factor(200.0) - 0.8).abs() < 1e-12);
        assert_eq!(latency_factor(5000.0), MIN_FACTOR);

        assert_eq!(error_factor(0.0), 1.0);
        assert!((error_factor(0.3) - 0.7).abs() < 1e-12);
        assert_eq!(error_factor(12.0), MIN_FACTOR);
    }

    #[test]
    fn test_loaded_system_scenario() {
        let baseline = AdaptiveParameters { rate: 100.0, capacity: 200.0 };
        let metrics = snapshot(90.0, 800.0, 0.3, 50.0);

        for hour in 0..24 {
            let expected_factor = time_of_day_factor(hour) * 0.5 * 0.5 * 0.7;
            assert!((adjustment_factor(&metrics, hour) - expected_factor).abs() < 1e-12);

            let limits = compute_limits(&metrics, &baseline, hour);
            let expected_rate = (100.0 * expected_factor).clamp(50.0, 150.0);
            assert!((limits.rate - expected_rate).abs() < 1e-9);
            // Every hour puts this load below half the baseline
            assert_eq!(limits.rate, 50.0);
            assert_eq!(limits.capacity, 100.0);
        }
    }

    #[test]
    fn test_idle_system_grows_to_upper_bound() {
        let baseline = AdaptiveParameters { rate: 10.0, capacity: 20.0 };
        let limits = compute_limits(&snapshot(0.0, 0.0, 0.0, 0.0), &baseline, 18);
        assert_eq!(limits.rate, 15.0);
        assert_eq!(limits.capacity, 30.0);

        let limits = compute_limits(&snapshot(0.0, 0.0, 0.0, 0.0), &baseline, 12);
        assert_eq!(limits.rate, 10.0);
        assert_eq!(limits.capacity, 20.0);
    }

    #[test]
    fn test_request_rate_only_scales_capacity() {
        let baseline = AdaptiveParameters { rate: 10.0, capacity: 20.0 };
        let limits = compute_limits(&snapshot(0.0, 0.0, 0.0, 12.0), &baseline, 12);
        assert_eq!(limits.rate, 10.0);
        assert!((limits.capacity - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_hold_for_all_inputs() {
        let baseline = AdaptiveParameters { rate: 7.5, capacity: 33.0 };
        let cpus = [0.0, 25.0, 50.0, 99.9, 100.0];
        let latencies = [0.0, 1.0, 450.0, 1000.0, 60_000.0];
        let error_rates = [0.0, 0.2, 0.9, 5.0];
        let request_rates = [0.0, 3.0, 7.5, 500.0];

        for hour in 0..24 {
            for &cpu in &cpus {
                for &latency in &latencies {
                    for &errors in &error_rates {
                        for &requests in &request_rates {
                            let limits = compute_limits(
                                &snapshot(cpu, latency, errors, requests),
                                &baseline,
                                hour,
                            );
                            assert!(limits.rate >= 7.5 * 0.5 && limits.rate <= 7.5 * 1.5);
                            assert!(limits.capacity >= 33.0 * 0.5 && limits.capacity <= 33.0 * 1.5);
                        }
                    }
                }
            }
        }
    }
}
