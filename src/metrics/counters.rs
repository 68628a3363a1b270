//! Counter helpers

use super::labels;
use metrics::counter;

/// Authentication started with `mechanism`
pub fn auth_attempted(mechanism: &'static str) {
    counter!("pgkeeper_auth_attempts_total", labels::MECHANISM => mechanism).increment(1);
}

/// Authentication finished successfully
pub fn auth_successful(mechanism: &'static str) {
    counter!("pgkeeper_auth_successes_total", labels::MECHANISM => mechanism).increment(1);
}

/// Authentication was rejected
pub fn auth_failed(mechanism: &'static str, reason: &'static str) {
    counter!(
        "pgkeeper_auth_failures_total",
        labels::MECHANISM => mechanism,
        "reason" => reason
    )
    .increment(1);
}

/// One connect attempt finished
pub fn connect_attempt(outcome: &'static str) {
    counter!("pgkeeper_connect_attempts_total", labels::OUTCOME => outcome).increment(1);
}

/// A connect attempt failed; `category` comes from [`crate::Error::category`]
pub fn connect_error(category: &'static str) {
    counter!("pgkeeper_connect_errors_total", labels::CATEGORY => category).increment(1);
}

/// Health probe failed and the connection was dropped
pub fn connection_lost() {
    counter!("pgkeeper_connection_lost_total").increment(1);
}

/// A reconnect was scheduled after a disconnect
pub fn reconnect_scheduled() {
    counter!("pgkeeper_reconnects_total").increment(1);
}

/// A transaction tool run finished
pub fn transaction_completed(options: String, outcome: &'static str) {
    counter!(
        "pgkeeper_transactions_total",
        labels::TX_OPTIONS => options,
        labels::OUTCOME => outcome
    )
    .increment(1);
}

/// A tool query or exec finished
pub fn statement_completed(kind: &'static str, outcome: &'static str) {
    counter!(
        "pgkeeper_statements_total",
        labels::KIND => kind,
        labels::OUTCOME => outcome
    )
    .increment(1);
}

/// A row could not be scanned and was left out of the result
pub fn row_skipped() {
    counter!("pgkeeper_rows_skipped_total").increment(1);
}

/// A registry entry was dropped because its isolation code is out of range
pub fn isolation_rejected() {
    counter!("pgkeeper_isolation_rejected_total").increment(1);
}

/// Certificate material was written to disk
pub fn certs_provisioned() {
    counter!("pgkeeper_certs_provisioned_total").increment(1);
}
