//! Prometheus counters, registered in the default registry so the host
//! application's `/metrics` endpoint (`prometheus::gather()`) exposes them.

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

use crate::models::DropReport;

lazy_static! {
    static ref SYNC_CYCLES: IntCounterVec = register_int_counter_vec!(
        "ativeplay_sync_cycles_total",
        "Completed sync cycles by source kind and outcome",
        &["source", "outcome"]
    )
    .unwrap();
    static ref DROPPED_RECORDS: IntCounterVec = register_int_counter_vec!(
        "ativeplay_sync_dropped_records_total",
        "Records left out of the canonical set, by reason",
        &["reason"]
    )
    .unwrap();
    static ref HTTP_RETRIES: IntCounterVec = register_int_counter_vec!(
        "ativeplay_sync_http_retries_total",
        "HTTP retries by source and reason",
        &["source", "reason"]
    )
    .unwrap();
}

pub fn record_cycle(source: &str, outcome: &str) {
    SYNC_CYCLES.with_label_values(&[source, outcome]).inc();
}

pub fn record_dropped(report: &DropReport) {
    for (reason, count) in report.iter() {
        DROPPED_RECORDS
            .with_label_values(&[reason.as_str()])
            .inc_by(count as u64);
    }
}

pub fn record_retry(source: &str, reason: &str) {
    HTTP_RETRIES.with_label_values(&[source, reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DropReason;

    #[test]
    fn test_counters_are_gathered() {
        let mut report = DropReport::new();
        report.add(DropReason::MissingUrl, 3);
        record_dropped(&report);
        record_cycle("m3u-url", "ok");
        record_retry("xtream", "network");

        let families = prometheus::gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"ativeplay_sync_cycles_total"));
        assert!(names.contains(&"ativeplay_sync_dropped_records_total"));
        assert!(names.contains(&"ativeplay_sync_http_retries_total"));
        assert!(
            DROPPED_RECORDS
                .with_label_values(&["missing_url"])
                .get()
                >= 3
        );
    }
}
