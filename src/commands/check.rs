//! Check command implementation.
//!
//! Validates configuration and everything the collector needs at runtime.

use herakles_vm_collector::config::{validate_effective_config, Config};
use herakles_vm_collector::hypervisor::{self, Hypervisor};
use herakles_vm_collector::{ProcfsHypervisor, SqliteStore};

use crate::startup_checks;

/// Validates configuration and system requirements.
pub fn command_check(config: &Config) -> anyhow::Result<()> {
    println!("🔍 Herakles VM Collector - System Check");
    println!("========================================");

    let mut all_ok = true;

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\n📁 Checking runtime requirements...");
    match startup_checks::validate_requirements(config) {
        Ok(_) => println!("   ✅ procfs and local data directory usable"),
        Err(e) => {
            println!("   ❌ {}", e);
            all_ok = false;
        }
    }

    println!("\n🖥️  Checking hypervisor...");
    match ProcfsHypervisor::open(config.proc_root()) {
        Ok(hv) => {
            let hv = hv.with_cpu_mhz_override(config.host_cpu_mhz);
            match hv.host_info() {
                Ok(host) => println!(
                    "   ✅ {} CPUs x {} MHz = {} MHz, {} MB RAM",
                    host.physical_cpus,
                    host.cpu_mhz_per_core,
                    host.total_capacity_mhz(),
                    host.ram_mb
                ),
                Err(e) => {
                    println!("   ❌ Host information unavailable: {}", e);
                    all_ok = false;
                }
            }
            match hypervisor::current_vms(&hv) {
                Ok(vms) => println!("   ✅ {} running VMs found", vms.len()),
                Err(e) => {
                    println!("   ❌ Cannot list VMs: {}", e);
                    all_ok = false;
                }
            }
        }
        Err(e) => {
            println!("   ❌ {}", e);
            all_ok = false;
        }
    }

    println!("\n🗄️  Checking usage store...");
    match SqliteStore::open(config.sql_connection()) {
        Ok(_) => println!("   ✅ {} opened", config.sql_connection()),
        Err(e) => {
            println!("   ❌ {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review the messages above");
        std::process::exit(1);
    }
}
