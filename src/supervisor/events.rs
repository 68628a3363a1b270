//! Connection lifecycle events

use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the event channel; slower subscribers skip older events
pub(crate) const EVENT_CAPACITY: usize = 64;

/// A connection state transition
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A connection was opened and answered its first probe
    Connected,
    /// A live connection was lost or closed
    Disconnected,
    /// A connect attempt or health probe failed
    Error(Arc<Error>),
}

/// Receiving side of the connector's events
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<ConnectionEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: broadcast::Receiver<ConnectionEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the connector is gone
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next `Connected`
    pub async fn wait_connected(&mut self) -> Result<()> {
        self.wait_for(|e| matches!(e, ConnectionEvent::Connected))
            .await
    }

    /// Wait for the next `Disconnected`
    pub async fn wait_disconnected(&mut self) -> Result<()> {
        self.wait_for(|e| matches!(e, ConnectionEvent::Disconnected))
            .await
    }

    async fn wait_for(&mut self, wanted: impl Fn(&ConnectionEvent) -> bool) -> Result<()> {
        while let Some(event) = self.recv().await {
            if wanted(&event) {
                return Ok(());
            }
        }
        Err(Error::Cancelled("event stream closed".into()))
    }
}
