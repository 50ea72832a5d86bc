//! History backfill for VMs that arrive on the host.

use ahash::AHashMap as HashMap;
use tracing::{debug, warn};

use crate::store::{self, RemoteStore};

/// Result of seeding newly added VMs from the remote store.
#[derive(Debug, Default)]
pub struct Backfill {
    /// Up to `data_length` most recent samples per VM, oldest first.
    pub seeds: HashMap<String, Vec<u64>>,
    /// VMs whose remote history could not be read.
    pub failed: Vec<String>,
}

/// Reads the most recent `data_length` samples of every added VM.
///
/// VMs without remote history get an empty seed. A read failure only
/// excludes the affected VM.
pub fn backfill(store: &dyn RemoteStore, data_length: usize, added: &[String]) -> Backfill {
    let mut out = Backfill::default();

    for vm_id in added {
        match store::fetch(store, data_length, std::slice::from_ref(vm_id)) {
            Ok(mut fetched) => {
                let values = fetched.remove(vm_id).unwrap_or_default();
                debug!("Backfilled {} samples for VM {}", values.len(), vm_id);
                out.seeds.insert(vm_id.clone(), values);
            }
            Err(e) => {
                warn!("Failed to backfill history of VM {}: {}", vm_id, e);
                out.failed.push(vm_id.clone());
            }
        }
    }

    out
}
