//! Histogram helpers; durations are recorded in milliseconds

use super::labels;
use metrics::histogram;

/// Time spent in the authentication exchange
pub fn auth_duration(mechanism: &'static str, duration_ms: u64) {
    histogram!("pgkeeper_auth_duration_ms", labels::MECHANISM => mechanism)
        .record(duration_ms as f64);
}

/// Time from open to first successful ping
pub fn connect_duration(outcome: &'static str, duration_ms: u64) {
    histogram!("pgkeeper_connect_duration_ms", labels::OUTCOME => outcome)
        .record(duration_ms as f64);
}

/// Round trip of a health probe
pub fn ping_duration(duration_ms: u64) {
    histogram!("pgkeeper_ping_duration_ms").record(duration_ms as f64);
}

/// Wall time of one transaction tool run
pub fn transaction_duration(options: String, duration_ms: u64) {
    histogram!("pgkeeper_transaction_duration_ms", labels::TX_OPTIONS => options)
        .record(duration_ms as f64);
}

/// Wall time of a tool query or exec, including the wait for the connection
pub fn statement_duration(kind: &'static str, duration_ms: u64) {
    histogram!("pgkeeper_statement_duration_ms", labels::KIND => kind)
        .record(duration_ms as f64);
}
