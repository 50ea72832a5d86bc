//! Counter sampling and utilization calculation.
//!
//! Utilization is the share of the host's CPU time a VM consumed over a
//! poll interval. It is persisted as CPU MHz: the utilization ratio scaled
//! by the host's total capacity.

use ahash::AHashMap as HashMap;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::hypervisor::{HostCapacity, Hypervisor, HypervisorError};

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Counters and samples produced by one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSamples {
    /// Cumulative CPU time (ns) read this cycle, per VM.
    pub cpu_time: HashMap<String, u64>,
    /// CPU MHz sample per VM; VMs without a computable sample are absent.
    pub cpu_mhz: HashMap<String, u64>,
    /// VMs whose counter could not be read this cycle.
    pub skipped: Vec<String>,
}

/// Reads the cumulative CPU time of one VM.
///
/// Returns `Ok(None)` if the VM is gone (raced departure).
pub fn sample_counter(
    hypervisor: &dyn Hypervisor,
    vm_id: &str,
) -> Result<Option<u64>, HypervisorError> {
    match hypervisor.cumulative_cpu_time(vm_id) {
        Ok(ns) => Ok(Some(ns)),
        Err(HypervisorError::VmNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Consumed CPU-seconds over available CPU-seconds in `[t0, t1)`.
///
/// Times are in seconds, counters in nanoseconds. The result is not
/// clamped: it can exceed 1.0.
pub fn calculate_utilization(num_pcpus: u32, t0: f64, t1: f64, c0: u64, c1: u64) -> f64 {
    (c1 as f64 - c0 as f64) / ((t1 - t0) * NANOS_PER_SECOND * num_pcpus as f64)
}

/// Converts a utilization ratio into CPU MHz of the given host capacity.
pub fn utilization_to_mhz(utilization: f64, total_capacity_mhz: u64) -> u64 {
    (utilization * total_capacity_mhz as f64).round().max(0.0) as u64
}

/// Samples every current VM and computes this cycle's CPU MHz values.
///
/// - `continuing_ids` with a counter in `previous_cpu_time` get a delta
///   sample over `[t0, t1)`; without one they only record a counter.
/// - Every added VM is a key of `added_vm_seed` and takes the last seeded
///   value as its sample (none if the seed is empty).
///
/// A VM whose counter cannot be read is skipped without failing the others.
pub fn collect_cycle_samples(
    hypervisor: &dyn Hypervisor,
    host: &HostCapacity,
    previous_cpu_time: &HashMap<String, u64>,
    t0: f64,
    t1: f64,
    continuing_ids: &[String],
    added_vm_seed: &HashMap<String, Vec<u64>>,
) -> CycleSamples {
    let vms: Vec<&String> = continuing_ids
        .iter()
        .chain(
            added_vm_seed
                .keys()
                .filter(|id| !continuing_ids.contains(id)),
        )
        .collect();

    let reads: Vec<(&String, Result<Option<u64>, HypervisorError>)> = vms
        .into_par_iter()
        .map(|id| (id, sample_counter(hypervisor, id)))
        .collect();

    let mut out = CycleSamples::default();

    for (id, read) in reads {
        let current = match read {
            Ok(Some(ns)) => ns,
            Ok(None) => {
                debug!("VM {} disappeared before its counter was read", id);
                out.skipped.push(id.clone());
                continue;
            }
            Err(e) => {
                warn!("Skipping VM {} this cycle: {}", id, e);
                out.skipped.push(id.clone());
                continue;
            }
        };
        out.cpu_time.insert(id.clone(), current);

        if let Some(seed) = added_vm_seed.get(id) {
            if let Some(&last) = seed.last() {
                out.cpu_mhz.insert(id.clone(), last);
            }
            continue;
        }

        let Some(&previous) = previous_cpu_time.get(id) else {
            continue;
        };

        if current < previous {
            debug!(
                "CPU time counter of VM {} went backwards ({} -> {}), treating as reset",
                id, previous, current
            );
            continue;
        }
        if t1 <= t0 {
            warn!(
                "Poll time did not advance ({} -> {}), no sample for VM {}",
                t0, t1, id
            );
            continue;
        }

        let utilization = calculate_utilization(host.physical_cpus, t0, t1, previous, current);
        let mhz = utilization_to_mhz(utilization, host.total_capacity_mhz());
        debug!(
            "VM {}: utilization {:.4} over {:.1}s -> {} MHz",
            id,
            utilization,
            t1 - t0,
            mhz
        );
        out.cpu_mhz.insert(id.clone(), mhz);
    }

    out
}
