//! Broker session state machine.
//!
//! ```text
//! Disconnected ──[backoff elapsed]──▶ Connecting ──[connect + subscribe ok]──▶ Connected
//!      ▲                                  │                                       │
//!      └──────────[attempt failed]────────┘                                       │
//!      └──────────────────────[session lost / publish saw drop]───────────────────┘
//! ```
//!
//! Reconnects are rate limited by `reconnect_backoff_ms` so a broker outage
//! does not turn into a connection storm. The first attempt after start-up
//! is immediate.

use tracing::{debug, info, warn};

use crate::clock::interval_elapsed;
use crate::error::{GatewayError, TransportError};
use crate::transport::{Inbound, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub(crate) struct ConnectionManager<T> {
    transport: T,
    state: ConnectionState,
    command_topic: String,
    reconnect_backoff_ms: u32,
    last_attempt: Option<u32>,
}

impl<T: Transport> ConnectionManager<T> {
    pub(crate) fn new(transport: T, command_topic: String, reconnect_backoff_ms: u32) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            command_topic,
            reconnect_backoff_ms,
            last_attempt: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Keep the session up. Cheap when already connected; otherwise makes at
    /// most one connect attempt per backoff window.
    pub(crate) async fn ensure_connected(&mut self, now: u32) {
        if self.state == ConnectionState::Connected {
            if self.transport.is_connected() {
                return;
            }
            self.mark_lost("transport reports session closed");
        }

        if let Some(last) = self.last_attempt {
            if !interval_elapsed(now, last, self.reconnect_backoff_ms) {
                return;
            }
        }

        self.last_attempt = Some(now);
        self.state = ConnectionState::Connecting;
        info!("broker reconnect attempt");

        if let Err(e) = self.transport.connect().await {
            warn!(error = %e, retry_in_ms = self.reconnect_backoff_ms, "broker connect failed");
            self.state = ConnectionState::Disconnected;
            return;
        }

        if let Err(e) = self.transport.subscribe(&self.command_topic).await {
            warn!(
                topic = %self.command_topic,
                error = %e,
                "subscribe failed, dropping session"
            );
            self.transport.disconnect().await;
            self.state = ConnectionState::Disconnected;
            return;
        }

        self.state = ConnectionState::Connected;
        info!(topic = %self.command_topic, "broker connected, subscribed");
    }

    /// Publish once. Fails without touching the transport when not
    /// connected; never retries internally.
    pub(crate) async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), GatewayError> {
        if self.state != ConnectionState::Connected {
            return Err(GatewayError::PublishFailure {
                topic: topic.to_string(),
                reason: TransportError::NotConnected.to_string(),
            });
        }

        match self.transport.publish(topic, payload).await {
            Ok(()) => {
                debug!(topic, bytes = payload.len(), "published");
                Ok(())
            }
            Err(e) => {
                if e.is_session_loss() {
                    self.mark_lost(&e.to_string());
                }
                Err(GatewayError::PublishFailure {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Next inbound message while connected. A transport failure drops the
    /// state to `Disconnected`; the next `ensure_connected` takes over.
    pub(crate) async fn poll_inbound(&mut self) -> Option<Inbound> {
        if self.state != ConnectionState::Connected {
            return None;
        }

        match self.transport.poll().await {
            Ok(msg) => msg,
            Err(e) => {
                self.mark_lost(&e.to_string());
                None
            }
        }
    }

    pub(crate) async fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.transport.disconnect().await;
            self.state = ConnectionState::Disconnected;
            info!("broker session closed");
        }
    }

    fn mark_lost(&mut self, reason: &str) {
        warn!(reason, "broker session dropped");
        self.state = ConnectionState::Disconnected;
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

// ===========================================================================
// Tests
// ===========================================================================
