//! Collection cycle orchestration.
//!
//! `Collector::init` opens the collaborators' view of the host and returns
//! the first `PollState`; `Collector::execute` runs one cycle and returns
//! the next state. The collector itself holds no mutable state between
//! cycles: the caller threads `PollState` through.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::backfill::{backfill, Backfill};
use crate::config::Config;
use crate::history::{self, HistoryError};
use crate::hypervisor::{self, HostCapacity, Hypervisor, HypervisorError, ProcfsHypervisor};
use crate::reconcile::{reconcile, subtract};
use crate::sampler;
use crate::store::{self, RemoteStore, SqliteStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("failed to create local data directory {path}: {source}")]
    LocalDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("collection aborted: {0}")]
    Aborted(String),
}

/// Plain values a cycle consumes.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Maximum samples retained per VM, locally and on backfill.
    pub data_length: usize,
    pub local_data_directory: PathBuf,
}

/// Host identity and capacity discovered at startup.
#[derive(Debug, Clone)]
pub struct Host {
    pub hostname: String,
    pub capacity: HostCapacity,
}

/// Snapshot carried from one cycle to the next.
#[derive(Debug, Clone, Default)]
pub struct PollState {
    /// Wall-clock seconds of the previous poll; 0 before the first cycle.
    pub previous_poll_time: f64,
    /// Last cumulative CPU time (ns) read per VM.
    pub previous_cpu_time: HashMap<String, u64>,
    pub previous_vm_set: HashSet<String>,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub poll_time: f64,
    pub vms: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// CPU MHz sample per VM, as persisted.
    pub samples: HashMap<String, u64>,
    pub skipped: Vec<String>,
    pub backfill_failures: Vec<String>,
    pub duration: Duration,
}

/// Current wall-clock time in fractional seconds since the epoch.
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

pub struct Collector {
    hypervisor: Box<dyn Hypervisor>,
    store: Box<dyn RemoteStore>,
    host: Host,
    settings: CollectorSettings,
}

impl Collector {
    /// Discovers the host, registers it in the remote store and builds the
    /// initial state.
    ///
    /// The previous VM set is taken from the local history directory, so
    /// VMs already known on this host are not backfilled again.
    #[instrument(skip_all)]
    pub fn init(
        hypervisor: Box<dyn Hypervisor>,
        store: Box<dyn RemoteStore>,
        settings: CollectorSettings,
    ) -> Result<(Self, PollState), CollectorError> {
        let dir = &settings.local_data_directory;
        fs::create_dir_all(dir).map_err(|source| CollectorError::LocalDirectory {
            path: dir.clone(),
            source,
        })?;

        let hostname = hypervisor.hostname()?;
        let capacity = hypervisor.host_info()?;
        store.register_host(&hostname, capacity.total_capacity_mhz(), capacity.ram_mb)?;
        info!(
            "Host {}: {} CPUs x {} MHz = {} MHz, {} MB RAM",
            hostname,
            capacity.physical_cpus,
            capacity.cpu_mhz_per_core,
            capacity.total_capacity_mhz(),
            capacity.ram_mb
        );

        let previous_vm_set = history::read(dir)?;
        debug!(
            "{} VMs with local history in {}",
            previous_vm_set.len(),
            dir.display()
        );

        let state = PollState {
            previous_poll_time: 0.0,
            previous_cpu_time: HashMap::new(),
            previous_vm_set,
        };

        Ok((
            Self {
                hypervisor,
                store,
                host: Host { hostname, capacity },
                settings,
            },
            state,
        ))
    }

    /// Opens the procfs hypervisor and the SQLite store named by `config`.
    pub fn from_config(config: &Config) -> Result<(Self, PollState), CollectorError> {
        let hypervisor = ProcfsHypervisor::open(config.proc_root())?
            .with_cpu_mhz_override(config.host_cpu_mhz);
        let store = SqliteStore::open(config.sql_connection())?;
        Self::init(
            Box::new(hypervisor),
            Box::new(store),
            config.collector_settings(),
        )
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    /// Runs one cycle at the current wall-clock time.
    pub fn execute(&self, state: &PollState) -> Result<(PollState, CycleReport), CollectorError> {
        self.execute_at(state, now_seconds())
    }

    /// Runs one cycle with `poll_time` as the end of the sampling interval.
    ///
    /// On error nothing is returned and `state` stays the caller's latest
    /// state; local files already touched in this cycle are not rolled back.
    #[instrument(skip(self, state))]
    pub fn execute_at(
        &self,
        state: &PollState,
        poll_time: f64,
    ) -> Result<(PollState, CycleReport), CollectorError> {
        let started = Instant::now();
        let dir = &self.settings.local_data_directory;
        let data_length = self.settings.data_length;

        let mut vms = hypervisor::current_vms(self.hypervisor.as_ref())?;
        vms.retain(|id| {
            let valid = history::is_valid_identifier(id);
            if !valid {
                warn!("Ignoring VM with unusable identifier {:?}", id);
            }
            valid
        });
        vms.sort_unstable();
        vms.dedup();
        let current: HashSet<String> = vms.iter().cloned().collect();

        let (added, removed) = reconcile(&state.previous_vm_set, &current);
        if !removed.is_empty() {
            info!("{} VMs left the host: {:?}", removed.len(), removed);
            history::cleanup(dir, &removed)?;
        }

        let Backfill { seeds, failed } = backfill(self.store.as_ref(), data_length, &added);
        if !added.is_empty() {
            info!(
                "{} VMs arrived on the host, {} backfilled",
                added.len(),
                seeds.len()
            );
            history::write(dir, &seeds, data_length)?;
        }

        // VMs whose backfill failed still get a counter read, without a seed value
        let mut added_vm_seed = seeds;
        for vm_id in &failed {
            added_vm_seed.entry(vm_id.clone()).or_default();
        }

        let continuing = subtract(&vms, &added);
        debug!("{} continuing VMs", continuing.len());

        let samples = sampler::collect_cycle_samples(
            self.hypervisor.as_ref(),
            &self.host.capacity,
            &state.previous_cpu_time,
            state.previous_poll_time,
            poll_time,
            &continuing,
            &added_vm_seed,
        );

        history::append(dir, &samples.cpu_mhz, data_length)?;
        let submitted = store::submit(self.store.as_ref(), &samples.cpu_mhz)?;

        let duration = started.elapsed();
        info!(
            "Cycle done: {} VMs, {} samples submitted, {} skipped in {:.3}s",
            vms.len(),
            submitted,
            samples.skipped.len(),
            duration.as_secs_f64()
        );

        let next = PollState {
            previous_poll_time: poll_time,
            previous_cpu_time: samples.cpu_time,
            previous_vm_set: current,
        };
        let report = CycleReport {
            poll_time,
            vms: vms.len(),
            added,
            removed,
            samples: samples.cpu_mhz,
            skipped: samples.skipped,
            backfill_failures: failed,
            duration,
        };

        Ok((next, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypervisor::VmHandle;
    use crate::store::SqliteStore;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// Hypervisor whose VMs and counters are set by the test.
    #[derive(Clone, Default)]
    struct Scripted {
        vms: Arc<Mutex<Vec<(String, u64)>>>,
    }

    impl Scripted {
        fn set(&self, vms: &[(&str, u64)]) {
            let mut guard = self.vms.lock().expect("lock");
            *guard = vms.iter().map(|(id, ns)| (id.to_string(), *ns)).collect();
        }
    }

    impl Hypervisor for Scripted {
        fn hostname(&self) -> Result<String, HypervisorError> {
            Ok("compute-1".into())
        }

        fn host_info(&self) -> Result<HostCapacity, HypervisorError> {
            Ok(HostCapacity {
                physical_cpus: 2,
                cpu_mhz_per_core: 1000,
                ram_mb: 8192,
            })
        }

        fn list_vm_ids(&self) -> Result<Vec<VmHandle>, HypervisorError> {
            let n = self.vms.lock().expect("lock").len();
            Ok((0..n as VmHandle).collect())
        }

        fn resolve_identifier(&self, handle: VmHandle) -> Result<String, HypervisorError> {
            self.vms
                .lock()
                .expect("lock")
                .get(handle as usize)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| HypervisorError::VmNotFound(handle.to_string()))
        }

        fn cumulative_cpu_time(&self, vm_id: &str) -> Result<u64, HypervisorError> {
            self.vms
                .lock()
                .expect("lock")
                .iter()
                .find(|(id, _)| id == vm_id)
                .map(|(_, ns)| *ns)
                .ok_or_else(|| HypervisorError::VmNotFound(vm_id.into()))
        }
    }

    #[test]
    fn test_init_registers_host_and_reads_local_set() {
        let dir = tempdir().expect("Failed to create temp dir");
        let data = dir.path().join("vms");
        fs::create_dir(&data).expect("mkdir");
        fs::write(data.join("known"), "5\n").expect("write");

        let (collector, state) = Collector::init(
            Box::new(Scripted::default()),
            Box::new(SqliteStore::in_memory().expect("store")),
            CollectorSettings {
                data_length: 5,
                local_data_directory: data,
            },
        )
        .expect("init");

        assert_eq!(collector.host().hostname, "compute-1");
        assert_eq!(collector.host().capacity.total_capacity_mhz(), 2000);
        assert_eq!(state.previous_poll_time, 0.0);
        assert!(state.previous_cpu_time.is_empty());
        assert!(state.previous_vm_set.contains("known"));
    }

    #[test]
    fn test_two_cycles_produce_delta_sample() {
        let dir = tempdir().expect("Failed to create temp dir");
        let hv = Scripted::default();
        hv.set(&[("vm-a", 2_000_000_000)]);

        let (collector, state) = Collector::init(
            Box::new(hv.clone()),
            Box::new(SqliteStore::in_memory().expect("store")),
            CollectorSettings {
                data_length: 10,
                local_data_directory: dir.path().to_path_buf(),
            },
        )
        .expect("init");

        let (state, report) = collector.execute_at(&state, 100.0).expect("cycle 1");
        assert_eq!(report.added, vec!["vm-a".to_string()]);
        assert!(report.samples.is_empty());
        assert_eq!(state.previous_cpu_time["vm-a"], 2_000_000_000);

        hv.set(&[("vm-a", 2_440_000_000)]);
        let (state, report) = collector.execute_at(&state, 110.0).expect("cycle 2");
        assert!(report.added.is_empty());
        assert_eq!(report.samples["vm-a"], 44);
        assert_eq!(state.previous_poll_time, 110.0);
        assert_eq!(
            history::read_history(dir.path(), "vm-a").expect("history"),
            vec![44]
        );
    }
}
