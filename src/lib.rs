//! pgkeeper: a self-healing PostgreSQL connection supervisor
//!
//! pgkeeper keeps exactly one database connection alive. A [`Connector`]
//! connects (provisioning TLS certificate files first when a secure mode
//! is configured), probes the connection periodically, and reconnects at
//! a fixed interval when a probe fails. Callers observe the lifecycle
//! through [`ConnectionEvent`]s.
//!
//! On top of the connection, an isolation registry hands out
//! [`TransactionTool`]s keyed by `(isolation level, read-only)`. Tools
//! reach the connection through the connector, so they keep working
//! across reconnects. Query results are normalized into [`RowResult`]s.
//!
//! The bundled [`PgDriver`] speaks the Postgres simple-query protocol
//! with cleartext or SCRAM-SHA-256 authentication and rustls-based TLS.
//! Any other database can be supervised by implementing
//! [`driver::Driver`].

#![warn(missing_docs)]

pub mod auth;
pub mod certs;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod rows;
pub mod supervisor;
pub mod tools;

pub use config::{CertPaths, CertSources, CertificateMaterial, ConnectionConfig};
pub use connection::SslMode;
pub use driver::{IsolationLevel, PgDriver, TxOptions};
pub use error::{Error, Result};
pub use rows::{normalize, Row, RowResult, Value};
pub use supervisor::{ConnectionEvent, Connector, EventStream, ReconnectPolicy};
pub use tools::{ExplicitTransaction, TransactionOutcome, TransactionTool};
