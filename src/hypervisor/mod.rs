//! Hypervisor access for the collector.
//!
//! The collector never talks to a hypervisor through global state: every
//! sampling call receives a `&dyn Hypervisor` capability, so tests can hand
//! in a fake implementation.
//!
//! - `procfs`: QEMU/KVM guests discovered through /proc

pub mod procfs;

pub use procfs::ProcfsHypervisor;

use tracing::debug;

/// Hypervisor-local handle of a running VM (a PID for QEMU guests).
pub type VmHandle = u32;

/// Physical characteristics of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapacity {
    pub physical_cpus: u32,
    pub cpu_mhz_per_core: u64,
    pub ram_mb: u64,
}

impl HostCapacity {
    /// Total CPU capacity of the host (cores × per-core MHz).
    pub fn total_capacity_mhz(&self) -> u64 {
        self.physical_cpus as u64 * self.cpu_mhz_per_core
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HypervisorError {
    #[error("failed to open hypervisor connection: {0}")]
    Connect(String),

    #[error("failed to query host information: {0}")]
    HostInfo(String),

    #[error("VM not found: {0}")]
    VmNotFound(String),

    #[error("failed to read {what}: {source}")]
    Io {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed data in {what}: {detail}")]
    Malformed { what: String, detail: String },
}

/// Capabilities the collector consumes from a hypervisor.
pub trait Hypervisor: Send + Sync {
    fn hostname(&self) -> Result<String, HypervisorError>;

    fn host_info(&self) -> Result<HostCapacity, HypervisorError>;

    fn list_vm_ids(&self) -> Result<Vec<VmHandle>, HypervisorError>;

    fn resolve_identifier(&self, handle: VmHandle) -> Result<String, HypervisorError>;

    /// Cumulative CPU time consumed by the VM, in nanoseconds.
    fn cumulative_cpu_time(&self, vm_id: &str) -> Result<u64, HypervisorError>;
}

/// Lists the identifiers of all VMs currently running on the host.
///
/// Handles that disappear between listing and resolution are skipped.
pub fn current_vms(hypervisor: &dyn Hypervisor) -> Result<Vec<String>, HypervisorError> {
    let handles = hypervisor.list_vm_ids()?;
    let mut out = Vec::with_capacity(handles.len());

    for handle in handles {
        match hypervisor.resolve_identifier(handle) {
            Ok(id) => out.push(id),
            Err(e) => debug!("Skipping VM handle {}: {}", handle, e),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap as HashMap;

    struct ListingOnly {
        handles: HashMap<VmHandle, Option<&'static str>>,
    }

    impl Hypervisor for ListingOnly {
        fn hostname(&self) -> Result<String, HypervisorError> {
            Ok("node-1".into())
        }

        fn host_info(&self) -> Result<HostCapacity, HypervisorError> {
            Ok(HostCapacity {
                physical_cpus: 1,
                cpu_mhz_per_core: 1000,
                ram_mb: 1024,
            })
        }

        fn list_vm_ids(&self) -> Result<Vec<VmHandle>, HypervisorError> {
            let mut handles: Vec<VmHandle> = self.handles.keys().copied().collect();
            handles.sort_unstable();
            Ok(handles)
        }

        fn resolve_identifier(&self, handle: VmHandle) -> Result<String, HypervisorError> {
            match self.handles.get(&handle) {
                Some(Some(id)) => Ok(id.to_string()),
                _ => Err(HypervisorError::VmNotFound(handle.to_string())),
            }
        }

        fn cumulative_cpu_time(&self, vm_id: &str) -> Result<u64, HypervisorError> {
            Err(HypervisorError::VmNotFound(vm_id.into()))
        }
    }

    #[test]
    fn test_total_capacity_mhz() {
        let host = HostCapacity {
            physical_cpus: 8,
            cpu_mhz_per_core: 2400,
            ram_mb: 32768,
        };
        assert_eq!(host.total_capacity_mhz(), 19200);
    }

    #[test]
    fn test_current_vms_skips_vanished_handles() {
        let mut handles = HashMap::new();
        handles.insert(10, Some("ec452be0-e5d0-11e1-aff1-0800200c9a66"));
        handles.insert(11, None);
        handles.insert(12, Some("f3e142d0-e5d0-11e1-aff1-0800200c9a66"));
        let hv = ListingOnly { handles };

        let vms = current_vms(&hv).expect("listing should succeed");
        assert_eq!(
            vms,
            vec![
                "ec452be0-e5d0-11e1-aff1-0800200c9a66".to_string(),
                "f3e142d0-e5d0-11e1-aff1-0800200c9a66".to_string(),
            ]
        );
    }
}
