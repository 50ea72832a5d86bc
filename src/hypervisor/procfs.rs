//! QEMU/KVM guests discovered through the /proc filesystem.
//!
//! Every running guest is a `qemu*` process whose command line carries the
//! VM identifier after `-uuid`. The guest's cumulative CPU time is the
//! process's user + system time from `/proc/<pid>/stat`.

use ahash::AHashMap as HashMap;
use once_cell::sync::Lazy;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, trace};

use super::{HostCapacity, Hypervisor, HypervisorError, VmHandle};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Get system clock ticks per second (usually 100, but can vary).
fn get_clk_tck() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is safe to call with _SC_CLK_TCK
        // Returns -1 on error, 0 if undefined - both are handled by the > 0 check
        unsafe {
            let tck = libc::sysconf(libc::_SC_CLK_TCK);
            if tck > 0 {
                return tck as u64;
            }
        }
    }
    // Fallback to common default for error cases or non-Unix platforms
    100
}

/// System clock ticks per second (for CPU time calculation).
pub static CLK_TCK: Lazy<u64> = Lazy::new(get_clk_tck);

/// Hypervisor backed by /proc.
pub struct ProcfsHypervisor {
    proc_root: PathBuf,
    cpu_mhz_override: Option<u64>,
    /// VM identifier -> PID, refreshed on lookup misses.
    pids: RwLock<HashMap<String, VmHandle>>,
}

impl ProcfsHypervisor {
    /// Opens the procfs mounted at `proc_root`.
    pub fn open(proc_root: impl Into<PathBuf>) -> Result<Self, HypervisorError> {
        let proc_root = proc_root.into();

        fs::read_dir(&proc_root).map_err(|e| {
            HypervisorError::Connect(format!("{}: {}", proc_root.display(), e))
        })?;
        if !proc_root.join("cpuinfo").exists() {
            return Err(HypervisorError::Connect(format!(
                "{} does not look like a procfs mount (no cpuinfo)",
                proc_root.display()
            )));
        }

        debug!("Opened procfs hypervisor at {}", proc_root.display());
        Ok(Self {
            proc_root,
            cpu_mhz_override: None,
            pids: RwLock::new(HashMap::new()),
        })
    }

    /// Uses a fixed per-core MHz instead of the cpuinfo value.
    pub fn with_cpu_mhz_override(mut self, mhz: Option<u64>) -> Self {
        self.cpu_mhz_override = mhz;
        self
    }

    fn remember(&self, vm_id: &str, pid: VmHandle) {
        if let Ok(mut guard) = self.pids.write() {
            guard.insert(vm_id.to_string(), pid);
        }
    }

    fn cached_pid(&self, vm_id: &str) -> Option<VmHandle> {
        self.pids.read().ok()?.get(vm_id).copied()
    }

    /// Rescans all guests and returns the PID of `vm_id`, if it is running.
    fn rescan_for(&self, vm_id: &str) -> Result<Option<VmHandle>, HypervisorError> {
        let mut found = None;
        for pid in self.list_vm_ids()? {
            if let Ok(id) = self.resolve_identifier(pid) {
                if id == vm_id {
                    found = Some(pid);
                }
            }
        }
        Ok(found)
    }
}

impl Hypervisor for ProcfsHypervisor {
    fn hostname(&self) -> Result<String, HypervisorError> {
        let name = nix::unistd::gethostname()
            .map_err(|e| HypervisorError::HostInfo(format!("gethostname: {}", e)))?;
        Ok(name.to_string_lossy().into_owned())
    }

    fn host_info(&self) -> Result<HostCapacity, HypervisorError> {
        let cpuinfo_path = self.proc_root.join("cpuinfo");
        let cpuinfo = fs::read_to_string(&cpuinfo_path).map_err(|source| HypervisorError::Io {
            what: cpuinfo_path.display().to_string(),
            source,
        })?;
        let (physical_cpus, cpuinfo_mhz) = parse_cpuinfo(&cpuinfo);
        if physical_cpus == 0 {
            return Err(HypervisorError::HostInfo(
                "no processor entries in cpuinfo".into(),
            ));
        }

        let cpu_mhz_per_core = self.cpu_mhz_override.or(cpuinfo_mhz).ok_or_else(|| {
            HypervisorError::HostInfo(
                "cpuinfo has no \"cpu MHz\" field; set host_cpu_mhz in the configuration".into(),
            )
        })?;

        let meminfo_path = self.proc_root.join("meminfo");
        let meminfo = fs::read_to_string(&meminfo_path).map_err(|source| HypervisorError::Io {
            what: meminfo_path.display().to_string(),
            source,
        })?;
        let ram_mb = parse_mem_total_mb(&meminfo).ok_or_else(|| {
            HypervisorError::HostInfo("MemTotal missing from meminfo".into())
        })?;

        Ok(HostCapacity {
            physical_cpus,
            cpu_mhz_per_core,
            ram_mb,
        })
    }

    fn list_vm_ids(&self) -> Result<Vec<VmHandle>, HypervisorError> {
        let entries = fs::read_dir(&self.proc_root).map_err(|source| HypervisorError::Io {
            what: self.proc_root.display().to_string(),
            source,
        })?;

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let Ok(pid) = name.parse::<VmHandle>() else {
                continue;
            };
            if is_qemu_process(&entry.path()) {
                out.push(pid);
            }
        }

        out.sort_unstable();
        trace!("Found {} QEMU processes", out.len());

        // Cache entries only for guests still running
        if let Ok(mut guard) = self.pids.write() {
            guard.retain(|_, pid| out.binary_search(pid).is_ok());
        }
        Ok(out)
    }

    fn resolve_identifier(&self, handle: VmHandle) -> Result<String, HypervisorError> {
        let cmdline_path = self.proc_root.join(handle.to_string()).join("cmdline");
        let content = fs::read(&cmdline_path)
            .map_err(|_| HypervisorError::VmNotFound(handle.to_string()))?;

        let id = parse_uuid_arg(&content).ok_or_else(|| HypervisorError::Malformed {
            what: cmdline_path.display().to_string(),
            detail: "no -uuid argument".into(),
        })?;

        self.remember(&id, handle);
        Ok(id)
    }

    fn cumulative_cpu_time(&self, vm_id: &str) -> Result<u64, HypervisorError> {
        let pid = match self.cached_pid(vm_id) {
            Some(pid) => pid,
            None => self
                .rescan_for(vm_id)?
                .ok_or_else(|| HypervisorError::VmNotFound(vm_id.to_string()))?,
        };

        let proc_path = self.proc_root.join(pid.to_string());
        match parse_cpu_time_ticks(&proc_path) {
            Ok(ticks) => Ok(ticks_to_nanos(ticks, *CLK_TCK)),
            Err(e) => {
                debug!("Failed to read CPU time for {} (pid {}): {}", vm_id, pid, e);
                if let Ok(mut guard) = self.pids.write() {
                    guard.remove(vm_id);
                }
                Err(HypervisorError::VmNotFound(vm_id.to_string()))
            }
        }
    }
}

/// Returns true if the process command name starts with "qemu".
fn is_qemu_process(proc_path: &Path) -> bool {
    fs::read_to_string(proc_path.join("comm"))
        .map(|s| s.trim().starts_with("qemu"))
        .unwrap_or(false)
}

/// Extracts the value following `-uuid` from a NUL-separated command line.
fn parse_uuid_arg(cmdline: &[u8]) -> Option<String> {
    let mut args = cmdline
        .split(|&b| b == 0u8)
        .filter_map(|s| std::str::from_utf8(s).ok());

    while let Some(arg) = args.next() {
        if arg == "-uuid" || arg == "--uuid" {
            return args
                .next()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
    }
    None
}

/// Parse total CPU time (utime + stime) in clock ticks from /proc/<pid>/stat.
fn parse_cpu_time_ticks(proc_path: &Path) -> Result<u64, std::io::Error> {
    let content = fs::read_to_string(proc_path.join("stat"))?;

    // The command name may contain spaces; fields are counted after ")".
    let after_comm = content
        .rfind(')')
        .map(|i| &content[i + 1..])
        .ok_or_else(|| std::io::Error::other("Invalid stat format"))?;

    let parts: Vec<&str> = after_comm.split_whitespace().collect();
    // utime and stime are fields 14 and 15; after the comm they sit at 11 and 12
    if parts.len() <= 12 {
        return Err(std::io::Error::other("Invalid stat format"));
    }

    let utime: u64 = parts[11]
        .parse()
        .map_err(|_| std::io::Error::other("Failed to parse utime field"))?;
    let stime: u64 = parts[12]
        .parse()
        .map_err(|_| std::io::Error::other("Failed to parse stime field"))?;

    Ok(utime + stime)
}

fn ticks_to_nanos(ticks: u64, clk_tck: u64) -> u64 {
    let clk_tck = clk_tck.max(1);
    (ticks as u128 * NANOS_PER_SECOND as u128 / clk_tck as u128) as u64
}

/// Counts processor entries and reads the first "cpu MHz" value.
fn parse_cpuinfo(content: &str) -> (u32, Option<u64>) {
    let mut processors = 0u32;
    let mut mhz = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "processor" => processors += 1,
            "cpu MHz" if mhz.is_none() => {
                mhz = value.trim().parse::<f64>().ok().map(|v| v.round() as u64);
            }
            _ => {}
        }
    }

    (processors, mhz)
}

/// Reads MemTotal from /proc/meminfo content, in MB.
fn parse_mem_total_mb(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb / 1024)
    })
}
