//! Explicitly scoped transactions

use crate::driver::{ExecOutcome, TxOptions};
use crate::rows::{normalize, RowResult};
use crate::supervisor::{BoxedConnection, ConnectionSlot};
use crate::{Error, Result};
use tokio::sync::OwnedMutexGuard;

/// A transaction driven by the caller.
///
/// The first operation (or an explicit [`begin`](Self::begin)) takes the
/// connection and issues BEGIN; [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) release it. Both also begin first when
/// nothing has run yet. While open, every other user of the connector
/// waits, so do not call tools of the same connector from inside.
///
/// Dropping an open transaction rolls it back on a background task.
pub struct ExplicitTransaction {
    slot: ConnectionSlot,
    options: TxOptions,
    guard: Option<OwnedMutexGuard<Option<BoxedConnection>>>,
}

impl ExplicitTransaction {
    pub(crate) fn new(slot: ConnectionSlot, options: TxOptions) -> Self {
        Self {
            slot,
            options,
            guard: None,
        }
    }

    /// Isolation/read-only settings
    pub fn options(&self) -> TxOptions {
        self.options
    }

    /// Whether BEGIN has run and the transaction is not finished
    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }

    /// Take the connection and issue BEGIN
    pub async fn begin(&mut self) -> Result<()> {
        if self.guard.is_some() {
            return Err(Error::InvalidState {
                expected: "no open transaction".into(),
                actual: "transaction already begun".into(),
            });
        }

        let mut guard = self.slot.lock_owned().await;
        let conn = guard.as_mut().ok_or(Error::NotConnected)?;
        conn.begin(self.options).await?;
        tracing::debug!(options = %self.options, "transaction begun");
        self.guard = Some(guard);
        Ok(())
    }

    async fn conn(&mut self) -> Result<&mut BoxedConnection> {
        if self.guard.is_none() {
            self.begin().await?;
        }
        self.guard
            .as_mut()
            .and_then(|guard| guard.as_mut())
            .ok_or(Error::NotConnected)
    }

    /// Run a row-returning statement inside the transaction
    pub async fn query(&mut self, sql: &str) -> Result<RowResult> {
        let conn = self.conn().await?;
        let mut cursor = conn.query(sql).await?;
        Ok(normalize(cursor.as_mut()))
    }

    /// Run a statement for its effect inside the transaction
    pub async fn exec(&mut self, sql: &str) -> Result<ExecOutcome> {
        self.conn().await?.execute(sql).await
    }

    /// Commit and release the connection
    pub async fn commit(mut self) -> Result<()> {
        let result = self.conn().await?.commit().await;
        self.guard = None;
        result
    }

    /// Roll back and release the connection
    pub async fn rollback(mut self) -> Result<()> {
        let result = self.conn().await?.rollback().await;
        self.guard = None;
        result
    }
}

impl Drop for ExplicitTransaction {
    fn drop(&mut self) {
        let Some(mut guard) = self.guard.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(conn) = guard.as_mut() {
                        if let Err(e) = conn.rollback().await {
                            tracing::warn!(error = %e, "rollback of dropped transaction failed");
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!("transaction dropped outside a runtime, left open");
            }
        }
    }
}

impl std::fmt::Debug for ExplicitTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplicitTransaction")
            .field("options", &self.options)
            .field("active", &self.is_active())
            .finish()
    }
}
