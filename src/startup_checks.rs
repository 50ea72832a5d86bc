//! Startup requirement validation for herakles-vm-collector.
//!
//! Verifies that the collector can see the host's guests and write its
//! local history before the first cycle runs.

use nix::unistd::geteuid;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use herakles_vm_collector::config::Config;

/// Name of the probe written into the local data directory. Hidden, so it
/// is never mistaken for a VM history.
const PROBE_FILE: &str = ".herakles-write-probe";

/// Validate all runtime requirements
pub fn validate_requirements(config: &Config) -> Result<(), ValidationError> {
    info!("🔍 Validating runtime requirements...");

    check_user_privileges();
    check_proc_access(&config.proc_root())?;
    check_local_directory(&config.local_data_directory())?;

    info!("✅ All runtime requirements validated");
    Ok(())
}

/// Check if running with sufficient privileges
fn check_user_privileges() {
    if !geteuid().is_root() {
        warn!("⚠️  Not running as root - guests owned by other users may be unreadable");
        warn!("   Recommendation: Run as root or as the user owning the QEMU processes");
    } else {
        info!("✅ Running as root (uid=0)");
    }
}

/// Check that the procfs root exposes host information
fn check_proc_access(proc_root: &Path) -> Result<(), ValidationError> {
    for file in ["cpuinfo", "meminfo"] {
        let path = proc_root.join(file);
        match fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                error!("❌ Cannot read {} - insufficient permissions", path.display());
                return Err(ValidationError::InsufficientPermissions(e.to_string()));
            }
            Err(e) => {
                error!("❌ {} not available: {}", path.display(), e);
                return Err(ValidationError::ProcUnavailable(format!(
                    "{}: {}",
                    path.display(),
                    e
                )));
            }
        }
    }

    info!("✅ {} access: host information readable", proc_root.display());
    Ok(())
}

/// Check that the local history directory exists (or can be created) and is writable
fn check_local_directory(dir: &Path) -> Result<(), ValidationError> {
    let not_writable = |e: std::io::Error| ValidationError::DirectoryNotWritable {
        path: dir.display().to_string(),
        reason: e.to_string(),
    };

    fs::create_dir_all(dir).map_err(not_writable)?;

    let probe = dir.join(PROBE_FILE);
    fs::write(&probe, b"ok").map_err(not_writable)?;
    if let Err(e) = fs::remove_file(&probe) {
        warn!("⚠️  Could not remove {}: {}", probe.display(), e);
    }

    info!("✅ Local data directory {} is writable", dir.display());
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("procfs not available: {0}")]
    ProcUnavailable(String),

    #[error("Local data directory {path} not writable: {reason}")]
    DirectoryNotWritable { path: String, reason: String },
}
