use super::controller::compute_limits;
use super::cpu::{CpuSampler, SysinfoCpuSampler};
use super::meter::Meter;
use super::reservoir::LatencyReservoir;
use super::types::{AdaptiveParameters, BaselineMode, MetricsSnapshot};
use crate::metrics;
use crate::rate_limit::bucket::BucketState;
use chrono::Timelike;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bucket plus the baseline the next control cycle starts from
#[derive(Debug)]
struct ControlState {
    bucket: BucketState,
    baseline: AdaptiveParameters,
}

/// Rolling per-request aggregates
#[derive(Debug)]
struct Aggregates {
    latency: LatencyReservoir,
    requests: Meter,
    errors: Meter,
}

/// Per-instance token bucket whose rate and capacity follow live load
///
/// Admission, metric recording and the control loop use separate locks: the
/// bucket lock is only held for refill-and-take and for the read-modify-write
/// of the limits, never while CPU is sampled.
pub struct AdaptiveLimiter {
    /// Bucket and baseline
    state: Mutex<ControlState>,
    /// Latency distribution and rate meters
    aggregates: Mutex<Aggregates>,
    /// Signals used by the last control cycle
    snapshot: Mutex<MetricsSnapshot>,
    /// Host CPU source
    sampler: Mutex<Box<dyn CpuSampler>>,
    /// Values from configuration
    configured: AdaptiveParameters,
    mode: BaselineMode,
}

impl AdaptiveLimiter {
    /// Create a limiter sampling host CPU through `sysinfo`
    pub fn new(rate: f64, capacity: f64, mode: BaselineMode) -> Self {
        Self::with_sampler(rate, capacity, mode, Box::new(SysinfoCpuSampler::new()))
    }

    /// Create a limiter with a custom CPU source
    pub fn with_sampler(
        rate: f64,
        capacity: f64,
        mode: BaselineMode,
        sampler: Box<dyn CpuSampler>,
    ) -> Self {
        info!(
            rate = rate,
            capacity = capacity,
            mode = ?mode,
            "Creating adaptive limiter"
        );

        let now = Instant::now();
        let configured = AdaptiveParameters::new(rate, capacity);

        Self {
            state: Mutex::new(ControlState {
                bucket: BucketState::new(rate, capacity, now),
                baseline: configured,
            }),
            aggregates: Mutex::new(Aggregates {
                latency: LatencyReservoir::default(),
                requests: Meter::new(now),
                errors: Meter::new(now),
            }),
            snapshot: Mutex::new(MetricsSnapshot::default()),
            sampler: Mutex::new(sampler),
            configured,
            mode,
        }
    }

    /// Check whether one more request is admitted right now
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Admission check against an explicit clock reading
    pub fn allow_at(&self, now: Instant) -> bool {
        self.state.lock().bucket.try_take(now)
    }

    /// Record the outcome of one gated request
    pub fn record_metrics(&self, latency: Duration, is_error: bool) {
        self.record_metrics_at(latency, is_error, Instant::now());
    }

    pub fn record_metrics_at(&self, latency: Duration, is_error: bool, now: Instant) {
        let mut aggregates = self.aggregates.lock();
        aggregates.latency.update(latency, now);
        aggregates.requests.mark(1, now);
        if is_error {
            aggregates.errors.mark(1, now);
        }
    }

    /// Sample CPU and fold the rolling aggregates into a new snapshot
    pub fn update_metrics(&self) -> MetricsSnapshot {
        self.update_metrics_at(Instant::now())
    }

    pub fn update_metrics_at(&self, now: Instant) -> MetricsSnapshot {
        let cpu = self.sampler.lock().sample();

        let (latency_p95_ms, error_rate, request_rate) = {
            let mut aggregates = self.aggregates.lock();
            (
                aggregates.latency.percentile(0.95, now),
                aggregates.errors.rate(now),
                aggregates.requests.rate(now),
            )
        };

        let mut snapshot = self.snapshot.lock();
        match cpu {
            Some(usage) => snapshot.cpu_usage_percent = usage,
            None => warn!(
                previous = snapshot.cpu_usage_percent,
                "CPU sampling failed, keeping previous value"
            ),
        }
        snapshot.latency_p95_ms = latency_p95_ms;
        snapshot.error_rate = error_rate;
        snapshot.request_rate = request_rate;

        debug!(
            cpu = snapshot.cpu_usage_percent,
            latency_p95_ms = snapshot.latency_p95_ms,
            error_rate = snapshot.error_rate,
            request_rate = snapshot.request_rate,
            "Metrics updated"
        );

        *snapshot
    }

    /// Recompute rate and capacity from the current snapshot and local hour
    pub fn calculate_new_limits(&self) -> (f64, f64) {
        self.calculate_new_limits_for_hour(chrono::Local::now().hour())
    }

    /// Recompute rate and capacity for an explicit hour of day (0..24)
    pub fn calculate_new_limits_for_hour(&self, hour: u32) -> (f64, f64) {
        let snapshot = *self.snapshot.lock();

        let limits = {
            let mut state = self.state.lock();
            let baseline = match self.mode {
                BaselineMode::Compounding => state.baseline,
                BaselineMode::Anchored => self.configured,
            };

            let limits = compute_limits(&snapshot, &baseline, hour);
            if self.mode == BaselineMode::Compounding {
                state.baseline = limits;
            }
            state
                .bucket
                .set_limits(Instant::now(), limits.rate, limits.capacity);
            limits
        };

        metrics::record_adaptive_limits(limits.rate, limits.capacity);
        (limits.rate, limits.capacity)
    }

    /// One control cycle: sample, then apply new limits
    pub fn run_cycle(&self) -> (f64, f64) {
        let snapshot = self.update_metrics();
        metrics::record_adaptive_snapshot(&snapshot);
        self.calculate_new_limits()
    }

    /// Spawn the control loop, one cycle every `interval` until `shutdown` fires
    pub fn start(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let mut ticker = interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs_f64(), "Starting adaptive control loop");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let (rate, capacity) = limiter.run_cycle();
                        info!(rate = rate, capacity = capacity, "Adaptive limits updated");
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Adaptive control loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Rate and capacity the bucket currently enforces
    pub fn current_limits(&self) -> AdaptiveParameters {
        let state = self.state.lock();
        AdaptiveParameters::new(state.bucket.rate(), state.bucket.capacity())
    }

    /// Baseline the next cycle starts from
    pub fn baseline(&self) -> AdaptiveParameters {
        match self.mode {
            BaselineMode::Compounding => self.state.lock().baseline,
            BaselineMode::Anchored => self.configured,
        }
    }

    /// Requests and error events recorded since startup
    pub fn recorded_counts(&self) -> (u64, u64) {
        let aggregates = self.aggregates.lock();
        (aggregates.requests.count(), aggregates.errors.count())
    }

    /// Signals from the last [`update_metrics`](Self::update_metrics)
    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.snapshot.lock()
    }
}
