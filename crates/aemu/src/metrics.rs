//! Syscall and thread counters using metrics-rs.
//!
//! The core only emits counters; installing [`CliRecorder`] collects them in
//! memory so the CLI can print a summary after a run.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter,
};
use parking_lot::RwLock;

use crate::RunReport;

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "aemu_syscalls_total",
        Unit::Count,
        "Guest syscalls serviced, by route (override or builtin)"
    );
    describe_counter!(
        "aemu_guest_threads_total",
        Unit::Count,
        "Guest threads started"
    );
    describe_counter!(
        "aemu_guest_faults_total",
        Unit::Count,
        "Guest threads stopped by a memory fault"
    );
    describe_counter!(
        "aemu_guest_output_bytes_total",
        Unit::Bytes,
        "Bytes the guest wrote to stdout and stderr"
    );
}

/// Record totals from a finished run.
pub fn record_run(report: &RunReport) {
    counter!("aemu_guest_output_bytes_total").increment(report.stdout.len() as u64);
}

type Values = Arc<RwLock<BTreeMap<String, u64>>>;

struct CliCounter {
    key: String,
    values: Values,
}

impl metrics::CounterFn for CliCounter {
    fn increment(&self, value: u64) {
        *self.values.write().entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.values.write().insert(self.key.clone(), value);
    }
}

fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

/// Recorder that keeps counters in memory for terminal output.
///
/// Gauges and histograms are accepted and dropped.
#[derive(Default)]
pub struct CliRecorder {
    counters: Values,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle reading the counters this recorder collects.
    #[must_use]
    pub fn handle(&self) -> CliRecorderHandle {
        CliRecorderHandle {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Install as the global recorder. Returns `None` if one is already set.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let handle = self.handle();
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CliCounter {
            key: key_to_string(key),
            values: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

/// Read access to counters collected by an installed [`CliRecorder`].
pub struct CliRecorderHandle {
    counters: Values,
}

impl CliRecorderHandle {
    /// Counter value by rendered key, e.g. `aemu_syscalls_total{route=override}`.
    #[must_use]
    pub fn get_counter(&self, key: &str) -> Option<u64> {
        self.counters.read().get(key).copied()
    }

    /// Print all counters, sorted by key.
    pub fn print_summary(&self) {
        let counters = self.counters.read();
        if counters.is_empty() {
            println!("No metrics collected.");
            return;
        }
        println!();
        println!("## Metrics Summary");
        for (key, value) in &*counters {
            println!("  {key}: {value}");
        }
    }
}
