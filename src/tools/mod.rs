//! Isolation-scoped query and transaction tools
//!
//! A [`TransactionTool`] is bound to one [`TxOptions`](crate::driver::TxOptions)
//! key and reaches the connection through the connector's
//! [`ConnectionSlot`](crate::supervisor::ConnectionSlot), so reconnects are
//! picked up without re-registering tools.

mod explicit;
mod registry;
mod transaction;

pub use explicit::ExplicitTransaction;
pub use registry::IsolationRegistry;
pub use transaction::{TransactionOutcome, TransactionTool};
