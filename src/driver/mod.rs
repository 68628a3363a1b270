//! Driver boundary
//!
//! The supervisor and the transaction tools only talk to a database through
//! [`Driver`] and [`DriverConnection`]. [`PgDriver`] implements them over the
//! wire session in [`crate::connection`]; tests plug in scripted drivers.

mod dsn;
mod postgres;

pub use dsn::{ConnectionInfo, Target};
pub use postgres::{PgConnection, PgCursor, PgDriver};

use crate::{Error, Result};
use async_trait::async_trait;

/// A single cell as produced by a driver, before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Any integer type
    Int(i64),
    /// Any floating-point type
    Float(f64),
    /// Textual value
    Text(String),
    /// Raw driver bytes (bytea, unknown binary formats)
    Bytes(Vec<u8>),
}

/// Forward-only cursor over a query result
pub trait RowCursor: Send {
    /// Column names in result order
    fn columns(&self) -> &[String];

    /// Scan the next row. `Some(Err(_))` is a failure for that row only;
    /// iteration may continue afterwards.
    fn next_row(&mut self) -> Option<Result<Vec<SqlValue>>>;
}

/// Outcome of a statement executed for its effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Command tag reported by the server (e.g. `INSERT 0 3`)
    pub command: String,
    /// Rows touched, when the command reports a count
    pub rows_affected: u64,
}

impl ExecOutcome {
    /// Build from a command tag
    pub fn from_tag(tag: impl Into<String>) -> Self {
        let command = tag.into();
        let counted = matches!(
            command.split(' ').next(),
            Some("INSERT" | "UPDATE" | "DELETE" | "SELECT" | "MOVE" | "FETCH" | "COPY" | "MERGE")
        );
        let rows_affected = if counted {
            command
                .rsplit(' ')
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0)
        } else {
            0
        };
        Self {
            command,
            rows_affected,
        }
    }
}

/// Transaction isolation level, numbered 0..=7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum IsolationLevel {
    /// Server default
    #[default]
    Default,
    /// Read uncommitted
    ReadUncommitted,
    /// Read committed
    ReadCommitted,
    /// Write committed
    WriteCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Snapshot
    Snapshot,
    /// Serializable
    Serializable,
    /// Linearizable
    Linearizable,
}

impl IsolationLevel {
    /// Highest valid numeric code
    pub const MAX_CODE: u8 = 7;

    /// Numeric code of this level
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for IsolationLevel {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Default,
            1 => Self::ReadUncommitted,
            2 => Self::ReadCommitted,
            3 => Self::WriteCommitted,
            4 => Self::RepeatableRead,
            5 => Self::Snapshot,
            6 => Self::Serializable,
            7 => Self::Linearizable,
            other => {
                return Err(Error::UnsupportedIsolation(format!(
                    "code {} exceeds maximum {}",
                    other,
                    Self::MAX_CODE
                )))
            }
        })
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::ReadUncommitted => "read uncommitted",
            Self::ReadCommitted => "read committed",
            Self::WriteCommitted => "write committed",
            Self::RepeatableRead => "repeatable read",
            Self::Snapshot => "snapshot",
            Self::Serializable => "serializable",
            Self::Linearizable => "linearizable",
        };
        f.write_str(name)
    }
}

/// Settings a transaction is started with; also the registry key for tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TxOptions {
    /// Isolation level
    pub isolation: IsolationLevel,
    /// Read-only access mode
    pub read_only: bool,
}

impl TxOptions {
    /// Options for `isolation`/`read_only`
    pub fn new(isolation: IsolationLevel, read_only: bool) -> Self {
        Self {
            isolation,
            read_only,
        }
    }
}

impl std::fmt::Display for TxOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = if self.read_only { "read only" } else { "read write" };
        write!(f, "{}, {}", self.isolation, mode)
    }
}

/// Opens connections from a DSN
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a new connection; the handle is not yet probed
    async fn open(&self, dsn: &str) -> Result<Box<dyn DriverConnection>>;
}

/// A live connection handle
#[async_trait]
pub trait DriverConnection: Send {
    /// Lightweight liveness probe
    async fn ping(&mut self) -> Result<()>;

    /// Run a statement that returns rows
    async fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor>>;

    /// Run a statement for its effect
    async fn execute(&mut self, sql: &str) -> Result<ExecOutcome>;

    /// Start a transaction block
    async fn begin(&mut self, options: TxOptions) -> Result<()>;

    /// Commit the open transaction block
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction block
    async fn rollback(&mut self) -> Result<()>;

    /// Terminate the session; further calls fail
    async fn close(&mut self) -> Result<()>;
}
