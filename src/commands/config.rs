//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use herakles_vm_collector::config::Config;

use crate::cli::ConfigFormat;

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from(match format {
            ConfigFormat::Yaml => "herakles-vm-collector.yaml",
            ConfigFormat::Json => "herakles-vm-collector.json",
            ConfigFormat::Toml => "herakles-vm-collector.toml",
        }),
    };

    let content = render_config(&config, format, commented)?;

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

fn render_config(config: &Config, format: ConfigFormat, commented: bool) -> anyhow::Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => {
            let content = serde_yaml::to_string(config)?;
            if commented {
                add_config_comments(content)
            } else {
                content
            }
        }
    })
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles VM Collector Configuration
# ===================================
#
# Collection
# ----------
# data_collector_interval: 300   # Seconds between collection cycles
# data_length: 100               # Samples kept per VM (local history and backfill)
# local_data_directory: "/var/lib/herakles/vms"   # One history file per VM
# sql_connection: "/var/lib/herakles/usage.db"    # path, sqlite://path or :memory:
#
# Hypervisor
# ----------
# proc_root: "/proc"             # procfs used to discover QEMU/KVM guests
# host_cpu_mhz: null             # Per-core MHz if /proc/cpuinfo has no "cpu MHz"
#
# Server Configuration
# --------------------
# enable_http: true              # Serve /metrics and /health
# bind: "0.0.0.0"                # Bind IP (0.0.0.0 = all interfaces)
# port: 9216                     # HTTP port
#
# Logging
# -------
# log_level: "info"              # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_yaml_loads_back() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("generated.yaml");
        let content = render_config(&Config::default(), ConfigFormat::Yaml, true).expect("render");
        assert!(content.starts_with("# Herakles VM Collector Configuration"));
        fs::write(&path, content).expect("write");

        let loaded = herakles_vm_collector::config::load_config(Some(&path)).expect("load");
        assert_eq!(loaded.data_length(), 100);
        assert_eq!(loaded.port, Some(9216));
    }

    #[test]
    fn test_generated_toml_loads_back() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("generated.toml");
        let content = render_config(&Config::default(), ConfigFormat::Toml, false).expect("render");
        fs::write(&path, content).expect("write");

        let loaded = herakles_vm_collector::config::load_config(Some(&path)).expect("load");
        assert_eq!(loaded.sql_connection(), "/var/lib/herakles/usage.db");
    }
}
