use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

pub static LIFECYCLE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "invoice_lifecycle_transitions_total",
        "Invoice status transitions",
        &["from", "to"]
    )
    .expect("metric can be registered")
});

pub static EXPORT_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "invoice_export_attempts_total",
        "Export attempts by outcome",
        &["outcome"]
    )
    .expect("metric can be registered")
});

pub fn record_transition(from: &str, to: &str) {
    LIFECYCLE_TRANSITIONS.with_label_values(&[from, to]).inc();
}

pub fn record_export(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    EXPORT_ATTEMPTS.with_label_values(&[outcome]).inc();
}
