//! CPU utilization from cumulative counters

use crate::models::ResourceSample;

/// Fraction of CPU capacity used between two counter samples.
///
/// `1.0` is one fully saturated core, so the ceiling is `online_cpus`.
/// Returns `0.0` when either delta is not strictly positive, which covers
/// counter resets, a missing previous sample and a zero system delta.
pub fn cpu_fraction(
    total_prev: u64,
    total_cur: u64,
    system_prev: u64,
    system_cur: u64,
    online_cpus: u64,
) -> f64 {
    let cpu_delta = total_cur.saturating_sub(total_prev);
    let system_delta = system_cur.saturating_sub(system_prev);

    if cpu_delta == 0 || system_delta == 0 {
        return 0.0;
    }

    (cpu_delta as f64 / system_delta as f64) * online_cpus as f64
}

impl ResourceSample {
    pub fn cpu_fraction(&self) -> f64 {
        cpu_fraction(
            self.precpu.total_usage,
            self.cpu.total_usage,
            self.precpu.system_usage,
            self.cpu.system_usage,
            self.online_cpus,
        )
    }
}
