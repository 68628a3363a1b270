//! The shared connection handle

use crate::driver::DriverConnection;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

/// Boxed driver connection as stored in the slot
pub type BoxedConnection = Box<dyn DriverConnection>;

/// Exclusive owner of the live connection.
///
/// Everything that touches the connection (tools, the health monitor,
/// teardown) goes through this lock, so a handle is never used while it
/// is being closed or replaced. Clones share the same slot.
#[derive(Clone, Default)]
pub struct ConnectionSlot {
    inner: Arc<Mutex<Option<BoxedConnection>>>,
}

impl ConnectionSlot {
    /// Empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for a short operation
    pub async fn lock(&self) -> MutexGuard<'_, Option<BoxedConnection>> {
        self.inner.lock().await
    }

    /// Lock for an operation that outlives the borrow (explicit transactions)
    pub async fn lock_owned(&self) -> OwnedMutexGuard<Option<BoxedConnection>> {
        Arc::clone(&self.inner).lock_owned().await
    }

    /// Remove the connection
    pub(crate) async fn take(&self) -> Option<BoxedConnection> {
        self.inner.lock().await.take()
    }

    pub(crate) async fn is_occupied(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

impl std::fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSlot").finish_non_exhaustive()
    }
}
