//! Connection supervisor
//!
//! [`Connector`] owns the single live connection. It runs the
//! connect/reconnect loop, starts a [`health`] monitor for every live
//! connection, and reports transitions through an [`EventStream`].
//!
//! ```no_run
//! use pgkeeper::{ConnectionConfig, Connector, PgDriver};
//!
//! # async fn example() -> pgkeeper::Result<()> {
//! let connector = Connector::new(PgDriver::new());
//! connector.configure(ConnectionConfig::builder("app", "app").build());
//!
//! let mut events = connector.subscribe();
//! let supervisor = connector.spawn();
//! events.wait_connected().await?;
//!
//! connector.shutdown().await;
//! supervisor.await.ok();
//! # Ok(())
//! # }
//! ```

mod events;
pub mod health;
mod policy;
mod slot;

pub use events::{ConnectionEvent, EventStream};
pub use health::MonitorExit;
pub use policy::ReconnectPolicy;
pub use slot::{BoxedConnection, ConnectionSlot};

use crate::config::{CertPaths, ConnectionConfig};
use crate::driver::Driver;
use crate::tools::{IsolationRegistry, TransactionTool};
use crate::{Error, Result};
use health::HealthMonitor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Self-healing owner of one database connection.
///
/// Cheap to clone; clones share the connection, events and registry.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

struct Inner {
    driver: Arc<dyn Driver>,
    config: RwLock<ConnectionConfig>,
    policy: RwLock<Option<ReconnectPolicy>>,
    slot: ConnectionSlot,
    registry: IsolationRegistry,
    events: broadcast::Sender<ConnectionEvent>,
    stop: watch::Sender<bool>,
    connecting: AtomicBool,
    cert_paths: Mutex<Option<CertPaths>>,
    monitor: std::sync::Mutex<Option<JoinHandle<MonitorExit>>>,
}

/// How a single connect attempt ended
enum Attempt {
    Connected,
    AlreadyConnected,
    Failed,
    InFlight,
    Stopped,
}

/// Clears the in-flight flag when a connect attempt ends
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Connector {
    /// Connector over `driver` with the default configuration
    pub fn new(driver: impl Driver + 'static) -> Self {
        Self::with_driver(Arc::new(driver))
    }

    /// Connector over a shared driver
    pub fn with_driver(driver: Arc<dyn Driver>) -> Self {
        let (events, _) = broadcast::channel(events::EVENT_CAPACITY);
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                driver,
                config: RwLock::new(ConnectionConfig::default()),
                policy: RwLock::new(None),
                slot: ConnectionSlot::new(),
                registry: IsolationRegistry::default(),
                events,
                stop,
                connecting: AtomicBool::new(false),
                cert_paths: Mutex::new(None),
                monitor: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Set the configuration used by the next connect attempt
    pub fn configure(&self, config: ConnectionConfig) {
        tracing::debug!(target_db = %config.target(), sslmode = %config.sslmode, "configured");
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Replace the configuration and forget provisioned certificate paths.
    ///
    /// The live connection is kept; the change applies from the next
    /// connect attempt.
    pub async fn reconfigure(&self, config: ConnectionConfig) {
        self.configure(config);
        *self.inner.cert_paths.lock().await = None;
    }

    /// Current configuration
    pub fn config(&self) -> ConnectionConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Override the reconnect policy (default: fixed at the configured
    /// reconnect interval, unbounded)
    pub fn set_reconnect_policy(&self, policy: ReconnectPolicy) {
        *self
            .inner
            .policy
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(policy);
    }

    fn policy(&self, config: &ConnectionConfig) -> ReconnectPolicy {
        self.inner
            .policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(|| ReconnectPolicy::fixed(config.reconnect_interval))
    }

    /// Subscribe to connection events from now on
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe())
    }

    /// The shared connection slot
    pub fn slot(&self) -> &ConnectionSlot {
        &self.inner.slot
    }

    /// Rebuild the isolation registry from `isolation level → read-only`.
    ///
    /// Previously handed-out tools are discarded from the registry; callers
    /// must not rebuild while other tasks look tools up.
    pub fn set_toolset(&self, settings: impl IntoIterator<Item = (u8, bool)>) -> usize {
        self.inner.registry.rebuild(&self.inner.slot, settings)
    }

    /// Registered tool for `isolation`/`read_only`
    pub fn tool(&self, isolation: u8, read_only: bool) -> Option<Arc<TransactionTool>> {
        self.inner.registry.get(isolation, read_only)
    }

    /// Connect, then keep the connection alive until [`shutdown`](Self::shutdown).
    ///
    /// Failed attempts are retried per the reconnect policy; a lost
    /// connection re-enters the connect loop. Returns `Ok(())` on shutdown
    /// and `Error::Cancelled` if the policy gives up.
    pub async fn run(&self) -> Result<()> {
        let mut stop = self.inner.stop.subscribe();
        let mut failures = 0u32;

        loop {
            if *stop.borrow() {
                return Ok(());
            }

            let config = match self.attempt().await {
                Attempt::Connected | Attempt::AlreadyConnected => {
                    failures = 0;
                    match self.serve(&mut stop).await {
                        MonitorExit::Stopped => return Ok(()),
                        MonitorExit::Disconnected | MonitorExit::Absent => {
                            crate::metrics::counters::reconnect_scheduled();
                            tracing::info!("connection lost, reconnecting");
                            continue;
                        }
                    }
                }
                Attempt::Stopped => return Ok(()),
                Attempt::InFlight => {
                    let config = self.config();
                    let delay = self.policy(&config).interval();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.changed() => return Ok(()),
                    }
                    continue;
                }
                Attempt::Failed => self.config(),
            };

            failures = failures.saturating_add(1);
            let Some(delay) = self.policy(&config).next_delay(failures) else {
                tracing::error!(failures, "giving up on connecting");
                return Err(Error::Cancelled(format!(
                    "no connection after {} attempts",
                    failures
                )));
            };
            tracing::debug!(failures, delay_ms = delay.as_millis() as u64, "retrying connect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => return Ok(()),
            }
        }
    }

    /// Wait for the current health monitor, or for shutdown when
    /// monitoring is disabled
    async fn serve(&self, stop: &mut watch::Receiver<bool>) -> MonitorExit {
        let handle = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match handle {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "health monitor task failed");
                MonitorExit::Absent
            }),
            None => {
                while !*stop.borrow() {
                    if stop.changed().await.is_err() {
                        break;
                    }
                }
                MonitorExit::Stopped
            }
        }
    }

    /// One connect attempt.
    ///
    /// Returns `true` once a probed connection is installed (or one already
    /// was) and `false` on failure, after shutdown, or when another attempt
    /// is in flight. Failures are reported through the event stream.
    pub async fn run_once(&self) -> bool {
        matches!(
            self.attempt().await,
            Attempt::Connected | Attempt::AlreadyConnected
        )
    }

    async fn attempt(&self) -> Attempt {
        if *self.inner.stop.borrow() {
            return Attempt::Stopped;
        }
        let Some(_in_flight) = InFlight::acquire(&self.inner.connecting) else {
            tracing::debug!("connect attempt already in flight");
            return Attempt::InFlight;
        };
        if self.inner.slot.is_occupied().await {
            return Attempt::AlreadyConnected;
        }

        let config = self.config();
        let span = tracing::info_span!(
            "connect",
            host = %config.host,
            port = config.port,
            database = %config.database
        );
        let started = Instant::now();

        let mut conn = match self.connect(&config).instrument(span).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(target_db = %config.target(), error = %e, "connect failed");
                crate::metrics::counters::connect_attempt(crate::metrics::labels::OUTCOME_FAILURE);
                crate::metrics::counters::connect_error(e.category());
                crate::metrics::histograms::connect_duration(
                    crate::metrics::labels::OUTCOME_FAILURE,
                    started.elapsed().as_millis() as u64,
                );
                let _ = self.inner.events.send(ConnectionEvent::Error(Arc::new(e)));
                return Attempt::Failed;
            }
        };

        // shutdown raises the flag before it takes the slot
        let mut slot = self.inner.slot.lock().await;
        if *self.inner.stop.borrow() {
            drop(slot);
            tracing::info!("shut down while connecting, closing new connection");
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "error closing connection opened during shutdown");
            }
            return Attempt::Stopped;
        }

        let elapsed = started.elapsed().as_millis() as u64;
        crate::metrics::counters::connect_attempt(crate::metrics::labels::OUTCOME_SUCCESS);
        crate::metrics::histograms::connect_duration(
            crate::metrics::labels::OUTCOME_SUCCESS,
            elapsed,
        );

        let replaced = slot.replace(conn);
        crate::metrics::gauges::connection_up(true);
        tracing::info!(target_db = %config.target(), elapsed_ms = elapsed, "connected");

        self.start_monitor(&config);
        let _ = self.inner.events.send(ConnectionEvent::Connected);
        drop(slot);

        if let Some(mut replaced) = replaced {
            let _ = replaced.close().await;
        }
        Attempt::Connected
    }

    /// Provision certificates if needed, open, and probe
    async fn connect(&self, config: &ConnectionConfig) -> Result<BoxedConnection> {
        let paths = if config.sslmode.is_secure() {
            Some(self.cert_paths(config).await?)
        } else {
            None
        };
        let dsn = config.to_dsn(paths.as_ref());

        tracing::info!("connecting");
        let attempt = async {
            let mut conn = self.inner.driver.open(&dsn).await?;
            if let Err(e) = conn.ping().await {
                let _ = conn.close().await;
                return Err(e);
            }
            Ok(conn)
        };

        if config.connect_timeout.is_zero() {
            attempt.await
        } else {
            tokio::time::timeout(config.connect_timeout, attempt)
                .await
                .map_err(|_| Error::ConnectTimeout(config.connect_timeout))?
        }
    }

    /// Provisioned paths, written at most once per configuration
    async fn cert_paths(&self, config: &ConnectionConfig) -> Result<CertPaths> {
        let mut cached = self.inner.cert_paths.lock().await;
        if let Some(paths) = cached.as_ref() {
            return Ok(paths.clone());
        }
        let paths = crate::certs::provision(&config.certs).await?;
        *cached = Some(paths.clone());
        Ok(paths)
    }

    fn start_monitor(&self, config: &ConnectionConfig) {
        if config.ping_interval.is_zero() {
            tracing::debug!("ping interval is zero, health monitor disabled");
            return;
        }

        let monitor = HealthMonitor {
            slot: self.inner.slot.clone(),
            events: self.inner.events.clone(),
            interval: config.ping_interval,
            probe_timeout: (!config.connect_timeout.is_zero()).then_some(config.connect_timeout),
            stop: self.inner.stop.subscribe(),
        };
        let handle = tokio::spawn(monitor.run());

        let previous = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Run [`run`](Self::run) on a background task
    pub fn spawn(&self) -> JoinHandle<Result<()>> {
        let connector = self.clone();
        tokio::spawn(async move { connector.run().await })
    }

    /// Stop the supervisor and the health monitor and close the live
    /// connection. Emits `Disconnected` if a connection was live.
    ///
    /// The connector cannot be restarted afterwards.
    pub async fn shutdown(&self) {
        self.inner.stop.send_replace(true);

        let monitor = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            monitor.abort();
        }

        if let Some(mut conn) = self.inner.slot.take().await {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "error closing connection during shutdown");
            }
            crate::metrics::gauges::connection_up(false);
            let _ = self.inner.events.send(ConnectionEvent::Disconnected);
        }
        tracing::info!("connector shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        *self.inner.stop.borrow()
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config())
            .field("tools", &self.inner.registry.len())
            .finish()
    }
}
