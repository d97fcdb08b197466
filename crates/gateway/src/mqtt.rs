use std::collections::VecDeque;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tracing::debug;

use crate::config::BrokerConfig;
use crate::error::TransportError;
use crate::transport::{Inbound, Transport};

/// Requests (publish/subscribe) the client may queue ahead of the event loop.
const REQUEST_CAPACITY: usize = 10;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Per-device topic namespace: `<prefix>/<device_id>/<channel>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Topics {
    pub(crate) commands: String,
    pub(crate) measurement: String,
    pub(crate) errors: String,
}

impl Topics {
    pub(crate) fn new(prefix: &str, device_id: &str) -> Self {
        let base = format!("{}/{}", prefix.trim_end_matches('/'), device_id);
        Self {
            commands: format!("{base}/commands"),
            measurement: format!("{base}/measurement"),
            errors: format!("{base}/errors"),
        }
    }
}

// ---------------------------------------------------------------------------
// rumqttc-backed transport
// ---------------------------------------------------------------------------

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
}

pub(crate) struct MqttTransport {
    options: MqttOptions,
    /// Bound on the CONNACK wait and on confirming a publish.
    request_timeout: Duration,
    /// How long one pump step may wait for network activity.
    poll_budget: Duration,
    session: Option<Session>,
    /// Inbound publishes seen while confirming an outgoing one.
    pending: VecDeque<Inbound>,
}

impl MqttTransport {
    pub(crate) fn new(cfg: &BrokerConfig, poll_budget: Duration) -> Self {
        let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_sec));
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            options.set_credentials(user, pass);
        }
        if cfg.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        Self {
            options,
            request_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            poll_budget,
            session: None,
            pending: VecDeque::new(),
        }
    }
}

fn inbound(p: rumqttc::Publish) -> Inbound {
    Inbound {
        topic: p.topic,
        payload: p.payload.to_vec(),
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// Drive the event loop until our publish has been written out.
async fn pump_until_sent(
    eventloop: &mut EventLoop,
    pending: &mut VecDeque<Inbound>,
) -> Result<(), TransportError> {
    loop {
        let event = eventloop
            .poll()
            .await
            .map_err(|e| TransportError::SessionLost(e.to_string()))?;
        match event {
            Event::Outgoing(Outgoing::Publish(_)) => return Ok(()),
            Event::Incoming(Packet::Publish(p)) => pending.push_back(inbound(p)),
            Event::Incoming(Packet::Disconnect) => {
                return Err(TransportError::SessionLost("broker sent DISCONNECT".into()))
            }
            _ => {}
        }
    }
}

impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.session = None;
        self.pending.clear();

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let handshake =
            tokio::time::timeout(self.request_timeout, wait_for_connack(&mut eventloop)).await;

        match handshake {
            Ok(Ok(())) => {
                self.session = Some(Session { client, eventloop });
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Connect(e.to_string())),
            Err(_) => Err(TransportError::Connect(format!(
                "no CONNACK within {} ms",
                self.request_timeout.as_millis()
            ))),
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        session
            .client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        session
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        let sent = tokio::time::timeout(
            self.request_timeout,
            pump_until_sent(&mut session.eventloop, &mut self.pending),
        )
        .await;

        match sent {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.session = None;
                Err(e)
            }
            Err(_) => Err(TransportError::Rejected(format!(
                "publish not written within {} ms",
                self.request_timeout.as_millis()
            ))),
        }
    }

    async fn poll(&mut self) -> Result<Option<Inbound>, TransportError> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(msg));
        }
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;

        match tokio::time::timeout(self.poll_budget, session.eventloop.poll()).await {
            Err(_) => Ok(None),
            Ok(Ok(Event::Incoming(Packet::Publish(p)))) => Ok(Some(inbound(p))),
            Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                self.session = None;
                Err(TransportError::SessionLost("broker sent DISCONNECT".into()))
            }
            Ok(Ok(_)) => Ok(None),
            Ok(Err(e)) => {
                self.session = None;
                Err(TransportError::SessionLost(e.to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if session.client.try_disconnect().is_ok() {
                // One bounded pump step so the DISCONNECT reaches the broker.
                let _ = tokio::time::timeout(self.poll_budget, session.eventloop.poll()).await;
            }
            debug!("mqtt session dropped");
        }
        self.pending.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
