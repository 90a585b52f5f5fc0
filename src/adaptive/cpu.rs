use sysinfo::System;

/// Source of host CPU utilization for the control loop
///
/// `None` means the sample failed; the caller keeps its previous value.
pub trait CpuSampler: Send {
    /// Utilization across all cores, in percent (0..=100)
    fn sample(&mut self) -> Option<f64>;
}

/// CPU sampler backed by `sysinfo`
///
/// Each sample reports utilization since the previous one, so the first
/// reading after startup is only meaningful once a control interval passed.
pub struct SysinfoCpuSampler {
    system: System,
}

impl SysinfoCpuSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SysinfoCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSampler for SysinfoCpuSampler {
    fn sample(&mut self) -> Option<f64> {
        self.system.refresh_cpu_usage();
        if self.system.cpus().is_empty() {
            return None;
        }

        let usage = self.system.global_cpu_usage() as f64;
        usage.is_finite().then(|| usage.clamp(0.0, 100.0))
    }
}
