//! Isolation registry

use super::TransactionTool;
use crate::driver::{IsolationLevel, TxOptions};
use crate::supervisor::ConnectionSlot;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// At most one [`TransactionTool`] per `(isolation, read_only)` key
#[derive(Debug, Default)]
pub struct IsolationRegistry {
    tools: RwLock<HashMap<TxOptions, Arc<TransactionTool>>>,
}

impl IsolationRegistry {
    /// Replace every entry with tools for `settings`.
    ///
    /// Isolation codes above 7 are logged and skipped. Returns the number
    /// of registered tools.
    pub fn rebuild(
        &self,
        slot: &ConnectionSlot,
        settings: impl IntoIterator<Item = (u8, bool)>,
    ) -> usize {
        let mut tools = HashMap::new();
        for (code, read_only) in settings {
            let isolation = match IsolationLevel::try_from(code) {
                Ok(level) => level,
                Err(e) => {
                    tracing::error!(isolation = code, error = %e, "skipping tool");
                    crate::metrics::counters::isolation_rejected();
                    continue;
                }
            };
            let options = TxOptions::new(isolation, read_only);
            tools
                .entry(options)
                .or_insert_with(|| Arc::new(TransactionTool::new(slot.clone(), options)));
        }

        let count = tools.len();
        tracing::debug!(tools = count, "isolation registry rebuilt");
        crate::metrics::gauges::registry_size(count);
        *self.tools.write().unwrap_or_else(PoisonError::into_inner) = tools;
        count
    }

    /// Tool registered for `isolation`/`read_only`, if any
    pub fn get(&self, isolation: u8, read_only: bool) -> Option<Arc<TransactionTool>> {
        let isolation = IsolationLevel::try_from(isolation).ok()?;
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TxOptions::new(isolation, read_only))
            .cloned()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no tools are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
