//! Scripted in-memory driver for supervisor and tool tests
#![allow(dead_code)]

use async_trait::async_trait;
use pgkeeper::driver::{
    Driver, DriverConnection, ExecOutcome, RowCursor, SqlValue, TxOptions,
};
use pgkeeper::supervisor::EventStream;
use pgkeeper::{ConnectionConfig, ConnectionEvent, Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
pub struct State {
    /// Next `open` calls that fail with a refused connection
    pub failing_opens: u32,
    /// Every probe fails while set
    pub ping_fails: bool,
    /// Delay inside `open`
    pub open_delay: Option<Duration>,
    /// Statements containing any of these fail
    pub failing_statements: Vec<String>,
    /// COMMIT fails while set
    pub commit_fails: bool,
    /// Result returned by every query; `None` rows fail to scan
    pub result_columns: Vec<String>,
    pub result_rows: Vec<Option<Vec<SqlValue>>>,

    /// Lifecycle log: `open`, `open-failed`, `close`
    pub lifecycle: Vec<String>,
    /// Every statement in order, including BEGIN/COMMIT/ROLLBACK
    pub statements: Vec<String>,
    /// Effects visible after commit (or autocommit)
    pub committed: Vec<String>,
    /// Options of every BEGIN
    pub begins: Vec<TxOptions>,
    pub dsns: Vec<String>,
}

/// Shared handle to the scripted database
#[derive(Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<State>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn driver(&self) -> MockDriver {
        MockDriver { db: self.clone() }
    }

    pub fn opens(&self) -> usize {
        self.state()
            .lifecycle
            .iter()
            .filter(|e| e.starts_with("open"))
            .count()
    }

    pub fn successful_opens(&self) -> usize {
        self.state().lifecycle.iter().filter(|e| *e == "open").count()
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.state().ping_fails = fails;
    }

    fn fails(&self, sql: &str) -> bool {
        self.state()
            .failing_statements
            .iter()
            .any(|f| sql.contains(f.as_str()))
    }
}

pub struct MockDriver {
    db: MockDatabase,
}

#[async_trait]
impl Driver for MockDriver {
    async fn open(&self, dsn: &str) -> Result<Box<dyn DriverConnection>> {
        let delay = self.db.state().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.db.state();
        state.dsns.push(dsn.to_string());
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            state.lifecycle.push("open-failed".into());
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        state.lifecycle.push("open".into());
        Ok(Box::new(MockConnection {
            db: self.db.clone(),
            pending: None,
            closed: false,
        }))
    }
}

pub struct MockConnection {
    db: MockDatabase,
    pending: Option<Vec<String>>,
    closed: bool,
}

impl MockConnection {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn log(&self, sql: &str) {
        self.db.state().statements.push(sql.to_string());
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn ping(&mut self) -> Result<()> {
        self.check_open()?;
        if self.db.state().ping_fails {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "server went away",
            )));
        }
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<Box<dyn RowCursor>> {
        self.check_open()?;
        self.log(sql);
        if self.db.fails(sql) {
            return Err(Error::Sql(format!("relation does not exist: {}", sql)));
        }
        let state = self.db.state();
        Ok(Box::new(MockCursor {
            columns: state.result_columns.clone(),
            rows: state.result_rows.clone().into(),
        }))
    }

    async fn execute(&mut self, sql: &str) -> Result<ExecOutcome> {
        self.check_open()?;
        self.log(sql);
        if self.db.fails(sql) {
            return Err(Error::Sql(format!("statement failed: {}", sql)));
        }
        match self.pending.as_mut() {
            Some(pending) => pending.push(sql.to_string()),
            None => self.db.state().committed.push(sql.to_string()),
        }
        Ok(ExecOutcome::from_tag("INSERT 0 1"))
    }

    async fn begin(&mut self, options: TxOptions) -> Result<()> {
        self.check_open()?;
        if self.pending.is_some() {
            return Err(Error::InvalidState {
                expected: "idle".into(),
                actual: "in transaction".into(),
            });
        }
        self.log("BEGIN");
        self.db.state().begins.push(options);
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.log("COMMIT");
        let pending = self.pending.take().unwrap_or_default();
        let mut state = self.db.state();
        if state.commit_fails {
            return Err(Error::Sql("could not serialize access".into()));
        }
        state.committed.extend(pending);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        self.log("ROLLBACK");
        self.pending = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.db.state().lifecycle.push("close".into());
        }
        Ok(())
    }
}

struct MockCursor {
    columns: Vec<String>,
    rows: VecDeque<Option<Vec<SqlValue>>>,
}

impl RowCursor for MockCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Option<Result<Vec<SqlValue>>> {
        self.rows
            .pop_front()
            .map(|row| row.ok_or_else(|| Error::Protocol("scan failed".into())))
    }
}

/// Config with short intervals for tests
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig::builder("app", "app")
        .password("secret")
        .reconnect_interval(Duration::from_millis(10))
        .ping_interval(Duration::from_millis(20))
        .connect_timeout(Duration::from_secs(2))
        .build()
}

/// Next event, failing the test after two seconds
pub async fn next_event(events: &mut EventStream) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// Wait for `Connected`, failing the test after two seconds
pub async fn connected(events: &mut EventStream) {
    tokio::time::timeout(Duration::from_secs(2), events.wait_connected())
        .await
        .expect("timed out waiting for connect")
        .expect("event stream closed");
}

/// Wait for `Disconnected`, failing the test after two seconds
pub async fn disconnected(events: &mut EventStream) {
    tokio::time::timeout(Duration::from_secs(2), events.wait_disconnected())
        .await
        .expect("timed out waiting for disconnect")
        .expect("event stream closed");
}

/// Events received within `window`
pub async fn drain(events: &mut EventStream, window: Duration) -> Vec<ConnectionEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        seen.push(event);
    }
    seen
}

pub fn count_connected(events: &[ConnectionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::Connected))
        .count()
}

pub fn count_disconnected(events: &[ConnectionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::Disconnected))
        .count()
}

pub fn count_errors(events: &[ConnectionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ConnectionEvent::Error(_)))
        .count()
}
