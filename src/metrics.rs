//! Prometheus self-telemetry for herakles-vm-collector.
//!
//! The collector's product is the usage history; these metrics describe the
//! collector itself plus the most recent sample per VM.

use prometheus::{Counter, Gauge, GaugeVec, Opts, Registry};
use tracing::debug;

use herakles_vm_collector::{CycleReport, Host};

#[derive(Clone)]
pub struct CollectorMetrics {
    // ========== Cycle Metrics ==========
    pub cycle_duration_seconds: Gauge,
    pub last_cycle_success: Gauge,
    pub last_cycle_timestamp_seconds: Gauge,
    pub cycles_total: Counter,
    pub cycles_failed_total: Counter,

    // ========== VM Metrics ==========
    pub vms: Gauge,
    pub vms_added_total: Counter,
    pub vms_removed_total: Counter,
    pub vm_cpu_mhz: GaugeVec, // labels: vm

    // ========== Sample Metrics ==========
    pub samples_submitted_total: Counter,
    pub samples_skipped_total: Counter,
    pub backfill_failures_total: Counter,

    // ========== Host Metrics ==========
    pub host_capacity_mhz: Gauge,
    pub host_cpus: Gauge,
}

impl CollectorMetrics {
    /// Creates and registers all metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let cycle_duration_seconds = Gauge::new(
            "herakles_collector_cycle_duration_seconds",
            "Duration of the last collection cycle",
        )?;
        let last_cycle_success = Gauge::new(
            "herakles_collector_last_cycle_success",
            "Whether the last collection cycle succeeded (1) or failed (0)",
        )?;
        let last_cycle_timestamp_seconds = Gauge::new(
            "herakles_collector_last_cycle_timestamp_seconds",
            "Poll time of the last successful cycle (unix seconds)",
        )?;
        let cycles_total = Counter::new(
            "herakles_collector_cycles_total",
            "Collection cycles run since start",
        )?;
        let cycles_failed_total = Counter::new(
            "herakles_collector_cycles_failed_total",
            "Collection cycles that failed since start",
        )?;

        let vms = Gauge::new(
            "herakles_collector_vms",
            "VMs running on the host at the last cycle",
        )?;
        let vms_added_total = Counter::new(
            "herakles_collector_vms_added_total",
            "VMs that arrived on the host",
        )?;
        let vms_removed_total = Counter::new(
            "herakles_collector_vms_removed_total",
            "VMs that left the host",
        )?;
        let vm_cpu_mhz = GaugeVec::new(
            Opts::new(
                "herakles_collector_vm_cpu_mhz",
                "Last CPU MHz sample per VM",
            ),
            &["vm"],
        )?;

        let samples_submitted_total = Counter::new(
            "herakles_collector_samples_submitted_total",
            "Samples written to the usage store",
        )?;
        let samples_skipped_total = Counter::new(
            "herakles_collector_samples_skipped_total",
            "VMs skipped because their CPU time could not be read",
        )?;
        let backfill_failures_total = Counter::new(
            "herakles_collector_backfill_failures_total",
            "Failed history backfills for arriving VMs",
        )?;

        let host_capacity_mhz = Gauge::new(
            "herakles_collector_host_capacity_mhz",
            "Total CPU capacity of the host (cores x MHz)",
        )?;
        let host_cpus = Gauge::new(
            "herakles_collector_host_cpus",
            "Physical CPUs of the host",
        )?;

        registry.register(Box::new(cycle_duration_seconds.clone()))?;
        registry.register(Box::new(last_cycle_success.clone()))?;
        registry.register(Box::new(last_cycle_timestamp_seconds.clone()))?;
        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycles_failed_total.clone()))?;
        registry.register(Box::new(vms.clone()))?;
        registry.register(Box::new(vms_added_total.clone()))?;
        registry.register(Box::new(vms_removed_total.clone()))?;
        registry.register(Box::new(vm_cpu_mhz.clone()))?;
        registry.register(Box::new(samples_submitted_total.clone()))?;
        registry.register(Box::new(samples_skipped_total.clone()))?;
        registry.register(Box::new(backfill_failures_total.clone()))?;
        registry.register(Box::new(host_capacity_mhz.clone()))?;
        registry.register(Box::new(host_cpus.clone()))?;

        debug!("All collector metrics registered");

        Ok(Self {
            cycle_duration_seconds,
            last_cycle_success,
            last_cycle_timestamp_seconds,
            cycles_total,
            cycles_failed_total,
            vms,
            vms_added_total,
            vms_removed_total,
            vm_cpu_mhz,
            samples_submitted_total,
            samples_skipped_total,
            backfill_failures_total,
            host_capacity_mhz,
            host_cpus,
        })
    }

    pub fn set_host(&self, host: &Host) {
        self.host_capacity_mhz
            .set(host.capacity.total_capacity_mhz() as f64);
        self.host_cpus.set(host.capacity.physical_cpus as f64);
    }

    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles_total.inc();
        self.last_cycle_success.set(1.0);
        self.last_cycle_timestamp_seconds.set(report.poll_time);
        self.cycle_duration_seconds
            .set(report.duration.as_secs_f64());

        self.vms.set(report.vms as f64);
        self.vms_added_total.inc_by(report.added.len() as f64);
        self.vms_removed_total.inc_by(report.removed.len() as f64);

        self.samples_submitted_total
            .inc_by(report.samples.len() as f64);
        self.samples_skipped_total.inc_by(report.skipped.len() as f64);
        self.backfill_failures_total
            .inc_by(report.backfill_failures.len() as f64);

        // Departed VMs must not keep exporting their last sample
        for vm in &report.removed {
            let _ = self.vm_cpu_mhz.remove_label_values(&[vm.as_str()]);
        }
        for (vm, mhz) in &report.samples {
            self.vm_cpu_mhz.with_label_values(&[vm.as_str()]).set(*mhz as f64);
        }
    }

    pub fn record_failure(&self) {
        self.cycles_total.inc();
        self.cycles_failed_total.inc();
        self.last_cycle_success.set(0.0);
    }
}
