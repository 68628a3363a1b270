//! Label keys and values

/// Authentication mechanism label key
pub const MECHANISM: &str = "mechanism";
/// Outcome label key
pub const OUTCOME: &str = "outcome";
/// Error category label key
pub const CATEGORY: &str = "category";
/// Transaction options label key
pub const TX_OPTIONS: &str = "tx_options";
/// Statement kind label key
pub const KIND: &str = "kind";

/// Row-returning statement
pub const KIND_QUERY: &str = "query";
/// Statement run for its effect
pub const KIND_EXEC: &str = "exec";

/// No password exchange
pub const MECHANISM_TRUST: &str = "trust";
/// Cleartext password
pub const MECHANISM_CLEARTEXT: &str = "cleartext";
/// SCRAM-SHA-256
pub const MECHANISM_SCRAM: &str = "scram-sha-256";

/// Operation succeeded
pub const OUTCOME_SUCCESS: &str = "success";
/// Operation failed
pub const OUTCOME_FAILURE: &str = "failure";
/// Transaction committed
pub const OUTCOME_COMMITTED: &str = "committed";
/// A step failed and the transaction was rolled back
pub const OUTCOME_STEP_FAILED: &str = "step_failed";
/// COMMIT itself failed
pub const OUTCOME_COMMIT_FAILED: &str = "commit_failed";
/// No transaction could be started
pub const OUTCOME_NOT_STARTED: &str = "not_started";
