//! Adaptive limiter
//!
//! A local token bucket whose rate and capacity are rewritten by a periodic
//! control loop. Each cycle samples host CPU, folds the rolling request
//! aggregates (p95 latency, one-minute error and request rates) into a
//! [`MetricsSnapshot`], and scales the baseline by the product of the
//! time-of-day, CPU, latency and error factors, bounded to 50%-150% of the
//! baseline.

pub mod controller;
pub mod cpu;
pub mod limiter;
pub mod meter;
pub mod reservoir;
pub mod types;

pub use cpu::{CpuSampler, SysinfoCpuSampler};
pub use limiter::AdaptiveLimiter;
pub use types::{AdaptiveParameters, BaselineMode, MetricsSnapshot};
