//! Remote usage history store.
//!
//! The remote store is the durable, cross-host record of CPU MHz samples
//! per VM. This collector only appends to it and reads the most recent
//! values back to seed VMs that arrive on the host.
//!
//! - `sqlite`: store backed by a SQLite database

pub mod sqlite;

pub use sqlite::SqliteStore;

use ahash::AHashMap as HashMap;
use tracing::{debug, warn};

/// Internal row id of a VM in the store.
pub type VmRowId = i64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open store {connection}: {source}")]
    Open {
        connection: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("store query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("value {0} does not fit the store's integer column")]
    OutOfRange(u64),
}

/// Capabilities the collector consumes from the remote store.
pub trait RemoteStore: Send {
    fn register_host(
        &self,
        hostname: &str,
        total_capacity_mhz: u64,
        ram_mb: u64,
    ) -> Result<(), StoreError>;

    fn resolve_or_create_vm_row(&self, vm_id: &str) -> Result<VmRowId, StoreError>;

    fn append_usage(&self, row_id: VmRowId, cpu_mhz: u64) -> Result<(), StoreError>;

    /// The last `limit` samples of a VM, oldest first.
    fn recent_usage(&self, vm_id: &str, limit: usize) -> Result<Vec<u64>, StoreError>;
}

/// Appends one sample per VM.
///
/// Every VM is attempted; the first error is returned once the whole batch
/// has been processed. Returns the number of samples written.
pub fn submit(store: &dyn RemoteStore, samples: &HashMap<String, u64>) -> Result<usize, StoreError> {
    let mut written = 0usize;
    let mut first_error = None;

    for (vm_id, cpu_mhz) in samples {
        let result = store
            .resolve_or_create_vm_row(vm_id)
            .and_then(|row| store.append_usage(row, *cpu_mhz));
        match result {
            Ok(()) => written += 1,
            Err(e) => {
                warn!("Failed to submit sample for VM {}: {}", vm_id, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    debug!("Submitted {}/{} samples", written, samples.len());
    match first_error {
        Some(e) => Err(e),
        None => Ok(written),
    }
}

/// Reads the last `data_length` samples of each VM, oldest first.
///
/// VMs without remote records map to an empty sequence. The first failed
/// read fails the whole call; `backfill` fetches one VM at a time.
pub fn fetch(
    store: &dyn RemoteStore,
    data_length: usize,
    ids: &[String],
) -> Result<HashMap<String, Vec<u64>>, StoreError> {
    let mut out = HashMap::with_capacity(ids.len());
    for vm_id in ids {
        out.insert(vm_id.clone(), store.recent_usage(vm_id, data_length)?);
    }
    Ok(out)
}
