//! In-process statistics about collection cycles.
//!
//! Rendered as a plain-text table by the health endpoint and after bounded
//! test runs.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock as StdRwLock};
use std::time::Instant;

use crate::collector::CycleReport;

/// Running statistics for a single metric.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// (current, average, max, min, count)
    pub fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

pub struct CollectorStats {
    pub cycle_duration_seconds: Stat,
    pub vms_on_host: Stat,
    pub samples_per_cycle: Stat,

    pub cycles_total: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub vms_added: AtomicU64,
    pub vms_removed: AtomicU64,
    pub samples_submitted: AtomicU64,
    pub samples_skipped: AtomicU64,
    pub backfill_failures: AtomicU64,

    last_cycle_ok: AtomicBool,
    start_time: Instant,
    last_cycle_time: StdRwLock<Option<chrono::DateTime<chrono::Local>>>,
}

impl Default for CollectorStats {
    fn default() -> Self {
        Self {
            cycle_duration_seconds: Stat::default(),
            vms_on_host: Stat::default(),
            samples_per_cycle: Stat::default(),
            cycles_total: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            vms_added: AtomicU64::new(0),
            vms_removed: AtomicU64::new(0),
            samples_submitted: AtomicU64::new(0),
            samples_skipped: AtomicU64::new(0),
            backfill_failures: AtomicU64::new(0),
            last_cycle_ok: AtomicBool::new(false),
            start_time: Instant::now(),
            last_cycle_time: StdRwLock::new(None),
        }
    }
}

impl CollectorStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycle_duration_seconds
            .add_sample(report.duration.as_secs_f64());
        self.vms_on_host.add_sample(report.vms as f64);
        self.samples_per_cycle.add_sample(report.samples.len() as f64);

        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.vms_added
            .fetch_add(report.added.len() as u64, Ordering::Relaxed);
        self.vms_removed
            .fetch_add(report.removed.len() as u64, Ordering::Relaxed);
        self.samples_submitted
            .fetch_add(report.samples.len() as u64, Ordering::Relaxed);
        self.samples_skipped
            .fetch_add(report.skipped.len() as u64, Ordering::Relaxed);
        self.backfill_failures
            .fetch_add(report.backfill_failures.len() as u64, Ordering::Relaxed);

        self.last_cycle_ok.store(true, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_failure(&self) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_ok.store(false, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        if let Ok(mut guard) = self.last_cycle_time.write() {
            *guard = Some(chrono::Local::now());
        }
    }

    /// True once a cycle has run and the latest one succeeded.
    pub fn is_healthy(&self) -> bool {
        self.last_cycle_ok.load(Ordering::Relaxed)
    }

    pub fn get_success_rate(&self) -> f64 {
        let total = self.cycles_total.load(Ordering::Relaxed);
        let failed = self.cycles_failed.load(Ordering::Relaxed);
        if total == 0 {
            100.0
        } else {
            ((total - failed) as f64 / total as f64) * 100.0
        }
    }

    pub fn get_uptime_hours(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() / 3600.0
    }

    pub fn get_last_cycle_time_str(&self) -> String {
        self.last_cycle_time
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|t| t.format("%H:%M:%S").to_string()))
            .unwrap_or_else(|| "N/A".to_string())
    }

    pub fn render_table(&self) -> String {
        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(out, "HEALTH ENDPOINT - COLLECTOR INTERNAL STATS").ok();
        writeln!(out, "===========================================").ok();
        writeln!(out).ok();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out).ok();
        writeln!(out, "CYCLES").ok();
        writeln!(out, "------").ok();

        let rows: [(&str, &Stat, usize); 3] = [
            ("cycle_duration (s)", &self.cycle_duration_seconds, 3),
            ("vms_on_host", &self.vms_on_host, 0),
            ("samples_per_cycle", &self.samples_per_cycle, 0),
        ];
        for (name, stat, precision) in rows {
            let (cur, avg, max, min, _) = stat.snapshot();
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                name,
                format!("{:.p$}", cur, p = precision),
                format!("{:.p$}", avg, p = precision.max(1)),
                format!("{:.p$}", max, p = precision),
                format!("{:.p$}", min, p = precision),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "cycle_success_rate (%)",
            format!("{:.1}", self.get_success_rate()),
            "N/A",
            "N/A",
            "N/A",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out).ok();
        writeln!(out, "TOTALS").ok();
        writeln!(out, "------").ok();

        let counters = [
            ("vms_added", &self.vms_added),
            ("vms_removed", &self.vms_removed),
            ("samples_submitted", &self.samples_submitted),
            ("samples_skipped", &self.samples_skipped),
            ("backfill_failures", &self.backfill_failures),
            ("failed_cycles", &self.cycles_failed),
        ];
        for (name, counter) in counters {
            writeln!(
                out,
                "{:left$} | {:^col$}",
                name,
                counter.load(Ordering::Relaxed),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(
            out,
            "number of done cycles: {} | last cycle: {} ({}) | uptime: {:.1}h",
            self.cycles_total.load(Ordering::Relaxed),
            self.get_last_cycle_time_str(),
            if self.is_healthy() { "ok" } else { "failed" },
            self.get_uptime_hours()
        )
        .ok();

        out
    }
}
