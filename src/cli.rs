//! CLI arguments and subcommands for herakles-vm-collector.
//!
//! This module defines the command-line interface using clap, and resolves
//! the effective configuration (CLI > config file > defaults).

use clap::{Parser, Subcommand, ValueEnum};
use herakles_vm_collector::config::{load_config, Config};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-vm-collector",
    about = "Per-VM CPU utilization collector for hypervisor hosts",
    long_about = "Per-VM CPU utilization collector for hypervisor hosts.\n\n\
                  Periodically samples the cumulative CPU time of every QEMU/KVM guest on the \
                  host, converts it into CPU MHz consumed per interval, and keeps a bounded \
                  history per VM locally and in a shared usage store.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Disable the HTTP server (/metrics, /health)
    #[arg(long)]
    pub no_http: bool,

    /// Log level (overrides the config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Seconds between collection cycles
    #[arg(short = 'i', long)]
    pub interval: Option<u64>,

    /// Samples retained per VM
    #[arg(long)]
    pub data_length: Option<usize>,

    /// Directory for the per-VM history files
    #[arg(long)]
    pub local_data_directory: Option<PathBuf>,

    /// Usage store connection (path, sqlite://path or :memory:)
    #[arg(long)]
    pub sql_connection: Option<String>,

    /// procfs mount used to discover guests
    #[arg(long)]
    pub proc_root: Option<PathBuf>,

    /// Per-core MHz override when /proc/cpuinfo has no "cpu MHz"
    #[arg(long)]
    pub host_cpu_mhz: Option<u64>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and runtime requirements
    Check,

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Run a bounded number of collection cycles and print the results
    Test {
        /// Number of cycles
        #[arg(short = 'n', long, default_value_t = 2)]
        iterations: usize,

        /// Seconds between cycles (overrides the configured interval)
        #[arg(long)]
        interval: Option<u64>,

        /// Print every VM sample
        #[arg(long)]
        verbose: bool,
    },
}

/// Loads the config file (unless disabled) and applies CLI overrides.
pub fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if args.no_http {
        config.enable_http = Some(false);
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(format!("{:?}", level).to_lowercase());
    }

    if let Some(interval) = args.interval {
        config.data_collector_interval = Some(interval);
    }
    if let Some(n) = args.data_length {
        config.data_length = Some(n);
    }
    if let Some(dir) = &args.local_data_directory {
        config.local_data_directory = Some(dir.clone());
    }
    if let Some(conn) = &args.sql_connection {
        config.sql_connection = Some(conn.clone());
    }
    if let Some(root) = &args.proc_root {
        config.proc_root = Some(root.clone());
    }
    if args.host_cpu_mhz.is_some() {
        config.host_cpu_mhz = args.host_cpu_mhz;
    }

    Ok(config)
}

pub fn show_config(config: &Config, format: ConfigFormat) -> anyhow::Result<()> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    println!("{output}");
    Ok(())
}
