use serde::{Deserialize, Serialize};

/// Which values the control loop treats as the baseline for each cycle
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BaselineMode {
    /// Each cycle's output becomes the next cycle's baseline, so limits can
    /// drift by up to 50% per cycle in either direction
    #[default]
    Compounding,
    /// Every cycle is computed and bounded against the configured values
    Anchored,
}

/// Load signals sampled by the control loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Host CPU utilization (0..=100)
    pub cpu_usage_percent: f64,
    /// 95th percentile request latency in milliseconds
    pub latency_p95_ms: f64,
    /// Error events per second, one-minute average
    pub error_rate: f64,
    /// Requests per second, one-minute average
    pub request_rate: f64,
}

/// Rate (tokens/sec) and capacity (tokens) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdaptiveParameters {
    pub rate: f64,
    pub capacity: f64,
}

impl AdaptiveParameters {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self { rate, capacity }
    }
}
