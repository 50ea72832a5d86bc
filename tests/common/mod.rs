//! Shared fakes for the integration tests.

#![allow(dead_code)]

use ahash::AHashMap as HashMap;
use herakles_vm_collector::hypervisor::VmHandle;
use herakles_vm_collector::store::{RemoteStore, StoreError, VmRowId};
use herakles_vm_collector::{
    Collector, CollectorError, CollectorSettings, HostCapacity, Hypervisor, HypervisorError,
    PollState, SqliteStore,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const VM_A: &str = "ec452be0-e5d0-11e1-aff1-0800200c9a66";
pub const VM_B: &str = "e615c450-e5d0-11e1-aff1-0800200c9a66";
pub const VM_C: &str = "f3e142d0-e5d0-11e1-aff1-0800200c9a66";

/// Hypervisor whose guests and counters are scripted by the test.
///
/// Clones share state, so a test can keep a handle after boxing one into
/// the collector.
#[derive(Clone, Default)]
pub struct FakeHypervisor {
    inner: Arc<Mutex<FakeGuests>>,
}

#[derive(Default)]
struct FakeGuests {
    /// (identifier, cumulative ns) in listing order
    running: Vec<(String, u64)>,
    /// Listed but gone by the time the counter is read
    vanishing: Vec<String>,
    host_info_fails: bool,
}

impl FakeHypervisor {
    pub fn set_running(&self, vms: &[(&str, u64)]) {
        let mut guard = self.inner.lock().expect("lock");
        guard.running = vms.iter().map(|(id, ns)| (id.to_string(), *ns)).collect();
    }

    pub fn set_vanishing(&self, ids: &[&str]) {
        let mut guard = self.inner.lock().expect("lock");
        guard.vanishing = ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_host_info_failing(&self, fails: bool) {
        self.inner.lock().expect("lock").host_info_fails = fails;
    }

    fn listed(&self) -> Vec<String> {
        let guard = self.inner.lock().expect("lock");
        guard
            .running
            .iter()
            .map(|(id, _)| id.clone())
            .chain(guard.vanishing.iter().cloned())
            .collect()
    }
}

impl Hypervisor for FakeHypervisor {
    fn hostname(&self) -> Result<String, HypervisorError> {
        Ok("compute-7".into())
    }

    fn host_info(&self) -> Result<HostCapacity, HypervisorError> {
        if self.inner.lock().expect("lock").host_info_fails {
            return Err(HypervisorError::HostInfo("cpuinfo unreadable".into()));
        }
        Ok(HostCapacity {
            physical_cpus: 2,
            cpu_mhz_per_core: 1000,
            ram_mb: 16384,
        })
    }

    fn list_vm_ids(&self) -> Result<Vec<VmHandle>, HypervisorError> {
        Ok((0..self.listed().len() as VmHandle).collect())
    }

    fn resolve_identifier(&self, handle: VmHandle) -> Result<String, HypervisorError> {
        self.listed()
            .get(handle as usize)
            .cloned()
            .ok_or_else(|| HypervisorError::VmNotFound(handle.to_string()))
    }

    fn cumulative_cpu_time(&self, vm_id: &str) -> Result<u64, HypervisorError> {
        let guard = self.inner.lock().expect("lock");
        guard
            .running
            .iter()
            .find(|(id, _)| id == vm_id)
            .map(|(_, ns)| *ns)
            .ok_or_else(|| HypervisorError::VmNotFound(vm_id.into()))
    }
}

/// SQLite store whose writes can be made to fail.
pub struct SwitchableStore {
    inner: SqliteStore,
    fail_writes: Arc<AtomicBool>,
}

impl SwitchableStore {
    pub fn open(path: &Path, fail_writes: Arc<AtomicBool>) -> Self {
        Self {
            inner: SqliteStore::open(path.to_str().expect("utf8 path")).expect("open store"),
            fail_writes,
        }
    }
}

impl RemoteStore for SwitchableStore {
    fn register_host(&self, hostname: &str, mhz: u64, ram_mb: u64) -> Result<(), StoreError> {
        self.inner.register_host(hostname, mhz, ram_mb)
    }

    fn resolve_or_create_vm_row(&self, vm_id: &str) -> Result<VmRowId, StoreError> {
        self.inner.resolve_or_create_vm_row(vm_id)
    }

    fn append_usage(&self, row_id: VmRowId, cpu_mhz: u64) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Query(rusqlite::Error::InvalidQuery));
        }
        self.inner.append_usage(row_id, cpu_mhz)
    }

    fn recent_usage(&self, vm_id: &str, limit: usize) -> Result<Vec<u64>, StoreError> {
        self.inner.recent_usage(vm_id, limit)
    }
}

/// Paths of one test host: history directory and store database.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn history_dir(&self) -> PathBuf {
        self.dir.path().join("vms")
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("usage.db")
    }

    /// Second connection to the store, for seeding and assertions.
    pub fn store(&self) -> SqliteStore {
        SqliteStore::open(self.db_path().to_str().expect("utf8 path")).expect("open store")
    }

    pub fn seed_remote(&self, vm_id: &str, values: &[u64]) {
        let store = self.store();
        let row = store.resolve_or_create_vm_row(vm_id).expect("row");
        for v in values {
            store.append_usage(row, *v).expect("append");
        }
    }

    pub fn collector(
        &self,
        hypervisor: &FakeHypervisor,
        data_length: usize,
        fail_writes: Arc<AtomicBool>,
    ) -> (Collector, PollState) {
        self.try_collector(hypervisor, data_length, fail_writes)
            .expect("collector init")
    }

    pub fn try_collector(
        &self,
        hypervisor: &FakeHypervisor,
        data_length: usize,
        fail_writes: Arc<AtomicBool>,
    ) -> Result<(Collector, PollState), CollectorError> {
        Collector::init(
            Box::new(hypervisor.clone()),
            Box::new(SwitchableStore::open(&self.db_path(), fail_writes)),
            CollectorSettings {
                data_length,
                local_data_directory: self.history_dir(),
            },
        )
    }
}

pub fn map<V: Clone>(entries: &[(&str, V)]) -> HashMap<String, V> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
