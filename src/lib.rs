//! Herakles VM Collector Library
//!
//! Periodically samples the cumulative CPU time of every VM running on a
//! hypervisor host, turns consecutive samples into CPU utilization, and
//! persists the results to a bounded local history per VM and to a shared
//! remote store.
//!
//! # Usage
//!
//! ```no_run
//! use herakles_vm_collector::{Collector, CollectorSettings, ProcfsHypervisor, SqliteStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hypervisor = ProcfsHypervisor::open("/proc")?;
//! let store = SqliteStore::open("/var/lib/herakles/usage.db")?;
//! let settings = CollectorSettings {
//!     data_length: 100,
//!     local_data_directory: "/var/lib/herakles/vms".into(),
//! };
//!
//! let (collector, state) = Collector::init(Box::new(hypervisor), Box::new(store), settings)?;
//! let (_next_state, report) = collector.execute(&state)?;
//! println!("{} VMs, {} samples", report.vms, report.samples.len());
//! # Ok(())
//! # }
//! ```

pub mod backfill;
pub mod collector;
pub mod config;
pub mod history;
pub mod hypervisor;
pub mod reconcile;
pub mod sampler;
pub mod scheduler;
pub mod stats;
pub mod store;

// Re-export main types for convenience
pub use collector::{Collector, CollectorError, CollectorSettings, CycleReport, Host, PollState};
pub use config::Config;
pub use hypervisor::{HostCapacity, Hypervisor, HypervisorError, ProcfsHypervisor};
pub use stats::CollectorStats;
pub use store::{RemoteStore, SqliteStore, StoreError};
