//! PostgreSQL driver over the wire session

use super::dsn::{ConnectionInfo, Target};
use super::{
    Driver, DriverConnection, ExecOutcome, IsolationLevel, RowCursor, SqlValue, TxOptions,
};
use crate::connection::{Connection, Transport};
use crate::protocol::constants::oid;
use crate::protocol::{BackendMessage, TransactionStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;

/// Opens [`PgConnection`]s from keyword/value DSNs or `postgres://` URLs
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriver;

impl PgDriver {
    /// Create the driver
    pub fn new() -> Self {
        Self
    }

    async fn establish(info: &ConnectionInfo) -> Result<Connection> {
        let tls = info.to_tls_config()?;
        let transport = match &info.target {
            Target::Tcp { host, port } => Transport::connect_tcp(host, *port, None).await?,
            Target::Unix(path) => Transport::connect_unix(path).await?,
        };

        let mut conn = Connection::new(transport);
        conn.startup(&info.session_params(), tls.as_ref(), info.host())
            .await?;
        Ok(conn)
    }
}

#[async_trait]
impl Driver for PgDriver {
    async fn open(&self, dsn: &str) -> Result<Box<dyn DriverConnection>> {
        let info = ConnectionInfo::parse(dsn)?;
        let conn = match info.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, Self::establish(&info))
                .await
                .map_err(|_| Error::ConnectTimeout(limit))??,
            None => Self::establish(&info).await?,
        };
        tracing::debug!(
            database = %info.database,
            user = %info.user,
            process_id = ?conn.process_id(),
            "session opened"
        );
        Ok(Box::new(PgConnection { conn: Some(conn) }))
    }
}

/// A PostgreSQL session behind [`DriverConnection`]
pub struct PgConnection {
    conn: Option<Connection>,
}

impl PgConnection {
    /// Wrap an already authenticated session
    pub fn new(conn: Connection) -> Self {
        Self { conn: Some(conn) }
    }

    fn session(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Run `sql` and turn the first server error into `Error::Sql`
    async fn run(&mut self, sql: &str) -> Result<Vec<BackendMessage>> {
        let messages = self.session()?.simple_query(sql).await?;
        for msg in &messages {
            match msg {
                BackendMessage::ErrorResponse(err) => return Err(Error::Sql(err.to_string())),
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(%notice, "server notice")
                }
                _ => {}
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl DriverConnection for PgConnection {
    async fn ping(&mut self) -> Result<()> {
        self.run(";").await.map(|_| ())
    }

    async fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor>> {
        let messages = self.run(sql).await?;
        Ok(Box::new(PgCursor::from_messages(messages)))
    }

    async fn execute(&mut self, sql: &str) -> Result<ExecOutcome> {
        let messages = self.run(sql).await?;
        let tag = messages
            .into_iter()
            .filter_map(|msg| match msg {
                BackendMessage::CommandComplete(tag) => Some(tag),
                _ => None,
            })
            .last()
            .unwrap_or_default();
        Ok(ExecOutcome::from_tag(tag))
    }

    async fn begin(&mut self, options: TxOptions) -> Result<()> {
        let statement = begin_statement(options)?;
        let status = self.session()?.transaction_status();
        if status != TransactionStatus::Idle {
            return Err(Error::InvalidState {
                expected: "no open transaction".into(),
                actual: format!("{:?}", status),
            });
        }
        self.run(&statement).await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<()> {
        let messages = self.run("COMMIT").await?;
        // COMMIT of a failed block reports ROLLBACK
        let rolled_back = messages
            .iter()
            .any(|msg| matches!(msg, BackendMessage::CommandComplete(tag) if tag == "ROLLBACK"));
        if rolled_back {
            return Err(Error::Sql(
                "transaction was aborted; COMMIT rolled back".into(),
            ));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.run("ROLLBACK").await.map(|_| ())
    }

    async fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }
}

/// `BEGIN` for `options`, or `UnsupportedIsolation` for levels PostgreSQL lacks
fn begin_statement(options: TxOptions) -> Result<String> {
    let isolation = match options.isolation {
        IsolationLevel::Default => None,
        IsolationLevel::ReadUncommitted => Some("READ UNCOMMITTED"),
        IsolationLevel::ReadCommitted => Some("READ COMMITTED"),
        IsolationLevel::RepeatableRead => Some("REPEATABLE READ"),
        IsolationLevel::Serializable => Some("SERIALIZABLE"),
        other => {
            return Err(Error::UnsupportedIsolation(format!(
                "{} is not supported by PostgreSQL",
                other
            )))
        }
    };
    let access = if options.read_only {
        "READ ONLY"
    } else {
        "READ WRITE"
    };

    Ok(match isolation {
        Some(level) => format!("BEGIN ISOLATION LEVEL {} {}", level, access),
        None => format!("BEGIN {}", access),
    })
}

/// Buffered result of one simple query
pub struct PgCursor {
    columns: Vec<String>,
    types: Vec<u32>,
    rows: VecDeque<Vec<Option<Bytes>>>,
}

impl PgCursor {
    /// Keep the last result set in `messages`
    fn from_messages(messages: Vec<BackendMessage>) -> Self {
        let mut cursor = Self {
            columns: Vec::new(),
            types: Vec::new(),
            rows: VecDeque::new(),
        };
        for msg in messages {
            match msg {
                BackendMessage::RowDescription(fields) => {
                    cursor.columns = fields.iter().map(|f| f.name.clone()).collect();
                    cursor.types = fields.iter().map(|f| f.type_oid).collect();
                    cursor.rows.clear();
                }
                BackendMessage::DataRow(cells) => cursor.rows.push_back(cells),
                _ => {}
            }
        }
        cursor
    }
}

impl RowCursor for PgCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Option<Result<Vec<SqlValue>>> {
        let cells = self.rows.pop_front()?;
        if cells.len() != self.types.len() {
            return Some(Err(Error::Protocol(format!(
                "row has {} values, expected {}",
                cells.len(),
                self.types.len()
            ))));
        }

        let row = cells
            .iter()
            .zip(&self.types)
            .zip(&self.columns)
            .map(|((cell, type_oid), column)| {
                decode_cell(*type_oid, cell.as_deref())
                    .map_err(|e| Error::Protocol(format!("column '{}': {}", column, e)))
            })
            .collect();
        Some(row)
    }
}

/// Decode one text-format cell
fn decode_cell(type_oid: u32, raw: Option<&[u8]>) -> std::result::Result<SqlValue, String> {
    let Some(raw) = raw else {
        return Ok(SqlValue::Null);
    };

    if type_oid == oid::BYTEA {
        return decode_bytea(raw).map(SqlValue::Bytes);
    }

    let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
    match type_oid {
        oid::BOOL => match text {
            "t" => Ok(SqlValue::Bool(true)),
            "f" => Ok(SqlValue::Bool(false)),
            other => Err(format!("invalid boolean '{}'", other)),
        },
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => text
            .parse()
            .map(SqlValue::Int)
            .map_err(|e| format!("invalid integer '{}': {}", text, e)),
        oid::FLOAT4 | oid::FLOAT8 => text
            .parse()
            .map(SqlValue::Float)
            .map_err(|e| format!("invalid float '{}': {}", text, e)),
        _ => Ok(SqlValue::Text(text.to_string())),
    }
}

/// Decode bytea hex output (`\x0a1b...`)
fn decode_bytea(raw: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let hex = raw
        .strip_prefix(b"\\x")
        .ok_or_else(|| "bytea value is not in hex format".to_string())?;
    if hex.len() % 2 != 0 {
        return Err("odd-length bytea hex".into());
    }
    hex.chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| "invalid bytea hex digit".to_string())
        })
        .collect()
}
