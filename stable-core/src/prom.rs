//! Metric names emitted by the stable scheduling protocol.

pub const METRIC_FILTER_DECISIONS: &str = "statefulset_stable_filter_decisions";
pub const METRIC_RECORDS_WRITTEN: &str = "statefulset_stable_records_written";
pub const METRIC_RECORD_CONFLICTS: &str = "statefulset_stable_record_conflicts";
pub const METRIC_RECORD_FAILURES: &str = "statefulset_stable_record_failures";

/// Register all metrics of this crate.
///
/// This function should be called only once, early in the lifetime of the process.
pub fn register_metrics() {
    metrics::register_counter!(METRIC_FILTER_DECISIONS, metrics::Unit::Count, "filter decisions labeled by outcome");
    metrics::register_counter!(METRIC_RECORDS_WRITTEN, metrics::Unit::Count, "scheduling records written to StatefulSets");
    metrics::register_counter!(METRIC_RECORD_CONFLICTS, metrics::Unit::Count, "version conflicts hit while writing scheduling records");
    metrics::register_counter!(METRIC_RECORD_FAILURES, metrics::Unit::Count, "scheduling records which could not be written");
}
