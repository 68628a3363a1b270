//! Transaction tool

use super::ExplicitTransaction;
use crate::driver::{ExecOutcome, TxOptions};
use crate::metrics::labels;
use crate::rows::{normalize, RowResult};
use crate::supervisor::ConnectionSlot;
use crate::{Error, Result};
use std::time::Instant;

/// How a [`TransactionTool::transaction`] run ended
#[derive(Debug)]
pub enum TransactionOutcome {
    /// Every statement ran and COMMIT succeeded; `last_step` is `None`
    /// for an empty statement list
    Committed {
        /// Index of the last statement
        last_step: Option<usize>,
    },
    /// Statement `step` failed; the transaction was rolled back
    StepFailed {
        /// Zero-based index of the failing statement
        step: usize,
        /// The statement error
        error: Error,
    },
    /// Every statement ran but COMMIT failed
    CommitFailed {
        /// Index of the last statement
        last_step: Option<usize>,
        /// The commit error
        error: Error,
    },
    /// No connection, or BEGIN failed; nothing ran
    NotStarted(Error),
}

impl TransactionOutcome {
    /// Whether the transaction committed
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// The failure, if any
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Committed { .. } => None,
            Self::StepFailed { error, .. } | Self::CommitFailed { error, .. } => Some(error),
            Self::NotStarted(error) => Some(error),
        }
    }

    /// `(step index, success)`; the index is `-1` when no statement is
    /// involved
    pub fn as_step_result(&self) -> (isize, bool) {
        let index = |step: Option<usize>| step.map_or(-1, |s| s as isize);
        match self {
            Self::Committed { last_step } => (index(*last_step), true),
            Self::StepFailed { step, .. } => (*step as isize, false),
            Self::CommitFailed { last_step, .. } => (index(*last_step), false),
            Self::NotStarted(_) => (-1, false),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Committed { .. } => labels::OUTCOME_COMMITTED,
            Self::StepFailed { .. } => labels::OUTCOME_STEP_FAILED,
            Self::CommitFailed { .. } => labels::OUTCOME_COMMIT_FAILED,
            Self::NotStarted(_) => labels::OUTCOME_NOT_STARTED,
        }
    }
}

/// Query, exec and transaction operations under one [`TxOptions`]
#[derive(Debug)]
pub struct TransactionTool {
    slot: ConnectionSlot,
    options: TxOptions,
}

impl TransactionTool {
    /// Tool over `slot` bound to `options`
    pub fn new(slot: ConnectionSlot, options: TxOptions) -> Self {
        Self { slot, options }
    }

    /// The bound isolation/read-only key
    pub fn options(&self) -> TxOptions {
        self.options
    }

    /// Run a row-returning statement outside a transaction block
    pub async fn query(&self, sql: &str) -> Result<RowResult> {
        tracing::debug!(sql, "query");
        let started = Instant::now();
        let result = async {
            let mut guard = self.slot.lock().await;
            let conn = guard.as_mut().ok_or(Error::NotConnected)?;
            let mut cursor = conn.query(sql).await?;
            Ok::<_, Error>(normalize(cursor.as_mut()))
        }
        .await;
        record_statement(labels::KIND_QUERY, started, &result);
        result
    }

    /// Run a statement for its effect outside a transaction block
    pub async fn exec(&self, sql: &str) -> Result<ExecOutcome> {
        tracing::debug!(sql, "exec");
        let started = Instant::now();
        let result = async {
            let mut guard = self.slot.lock().await;
            let conn = guard.as_mut().ok_or(Error::NotConnected)?;
            conn.execute(sql).await
        }
        .await;
        record_statement(labels::KIND_EXEC, started, &result);
        result
    }

    /// Run `statements` in order inside one transaction.
    ///
    /// The first failing statement rolls the transaction back. A rollback
    /// failure is logged and does not change the outcome.
    pub async fn transaction<S: AsRef<str>>(&self, statements: &[S]) -> TransactionOutcome {
        let started = Instant::now();
        let outcome = self.run_transaction(statements).await;

        crate::metrics::counters::transaction_completed(self.options.to_string(), outcome.label());
        crate::metrics::histograms::transaction_duration(
            self.options.to_string(),
            started.elapsed().as_millis() as u64,
        );
        outcome
    }

    async fn run_transaction<S: AsRef<str>>(&self, statements: &[S]) -> TransactionOutcome {
        let mut guard = self.slot.lock().await;
        let Some(conn) = guard.as_mut() else {
            return TransactionOutcome::NotStarted(Error::NotConnected);
        };

        if let Err(e) = conn.begin(self.options).await {
            tracing::error!(options = %self.options, error = %e, "failed to start transaction");
            return TransactionOutcome::NotStarted(e);
        }

        for (step, sql) in statements.iter().enumerate() {
            if let Err(error) = conn.execute(sql.as_ref()).await {
                tracing::error!(step, error = %error, "statement failed, rolling back");
                if let Err(e) = conn.rollback().await {
                    tracing::error!(error = %e, "rollback failed");
                }
                return TransactionOutcome::StepFailed { step, error };
            }
        }

        let last_step = statements.len().checked_sub(1);
        match conn.commit().await {
            Ok(()) => TransactionOutcome::Committed { last_step },
            Err(error) => {
                tracing::error!(error = %error, "commit failed");
                TransactionOutcome::CommitFailed { last_step, error }
            }
        }
    }

    /// Start an explicitly scoped transaction under this tool's options.
    ///
    /// The transaction holds the connection from its first operation
    /// until commit or rollback.
    pub fn custom_transaction(&self) -> ExplicitTransaction {
        ExplicitTransaction::new(self.slot.clone(), self.options)
    }
}

fn record_statement<T>(kind: &'static str, started: Instant, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => labels::OUTCOME_SUCCESS,
        Err(e) => {
            tracing::error!(kind, error = %e, "statement failed");
            labels::OUTCOME_FAILURE
        }
    };
    crate::metrics::counters::statement_completed(kind, outcome);
    crate::metrics::histograms::statement_duration(kind, started.elapsed().as_millis() as u64);
}
