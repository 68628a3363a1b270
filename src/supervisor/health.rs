//! Health monitor
//!
//! One monitor runs per live connection. It probes at a fixed interval and
//! ends on the first failed probe, after closing the connection and
//! emitting `Disconnected`. The next successful connect starts a new one.

use super::events::ConnectionEvent;
use super::slot::ConnectionSlot;
use crate::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

/// Why a monitor loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// A probe failed; the connection was closed
    Disconnected,
    /// No connection was installed when the monitor looked
    Absent,
    /// The connector was shut down
    Stopped,
}

pub(crate) struct HealthMonitor {
    pub(crate) slot: ConnectionSlot,
    pub(crate) events: broadcast::Sender<ConnectionEvent>,
    pub(crate) interval: Duration,
    /// Bound on a single probe; `None` waits indefinitely
    pub(crate) probe_timeout: Option<Duration>,
    pub(crate) stop: watch::Receiver<bool>,
}

impl HealthMonitor {
    pub(crate) async fn run(mut self) -> MonitorExit {
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "health monitor started");

        loop {
            if *self.stop.borrow() {
                return MonitorExit::Stopped;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.stop.changed() => return MonitorExit::Stopped,
            }

            let mut guard = self.slot.lock().await;
            let Some(conn) = guard.as_mut() else {
                tracing::debug!("no connection installed, health monitor exiting");
                return MonitorExit::Absent;
            };

            let started = Instant::now();
            let probe = match self.probe_timeout {
                Some(limit) => tokio::time::timeout(limit, conn.ping())
                    .await
                    .unwrap_or(Err(Error::ConnectTimeout(limit))),
                None => conn.ping().await,
            };

            match probe {
                Ok(()) => {
                    tracing::trace!("ping ok");
                    crate::metrics::histograms::ping_duration(started.elapsed().as_millis() as u64);
                }
                Err(e) => {
                    tracing::error!(error = %e, "ping failed, closing connection");
                    if let Some(mut stale) = guard.take() {
                        if let Err(close_err) = stale.close().await {
                            tracing::warn!(error = %close_err, "failed to close stale connection");
                        }
                    }
                    drop(guard);

                    crate::metrics::counters::connection_lost();
                    crate::metrics::gauges::connection_up(false);
                    let _ = self.events.send(ConnectionEvent::Disconnected);
                    let _ = self.events.send(ConnectionEvent::Error(Arc::new(e)));
                    return MonitorExit::Disconnected;
                }
            }
        }
    }
}
