//! Test doubles shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::clock::Clock;
use crate::error::{GatewayError, TransportError};
use crate::link::SerialLink;
use crate::transport::{Inbound, Transport};

/// In-memory broker session with switchable failure modes.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub(crate) connected: bool,
    pub(crate) refuse_connect: bool,
    pub(crate) refuse_subscribe: bool,
    pub(crate) reject_publish: bool,
    pub(crate) connect_calls: usize,
    pub(crate) publish_calls: usize,
    pub(crate) subscriptions: Vec<String>,
    pub(crate) published: Vec<(String, Vec<u8>)>,
    pub(crate) inbound: VecDeque<Inbound>,
}

impl MockTransport {
    /// Simulate the broker going away underneath an open session.
    pub(crate) fn drop_session(&mut self) {
        self.connected = false;
    }

    pub(crate) fn queue_inbound(&mut self, topic: &str, payload: &[u8]) {
        self.inbound.push_back(Inbound {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub(crate) fn published_to(&self, topic: &str) -> Vec<&[u8]> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.as_slice())
            .collect()
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connect_calls += 1;
        if self.refuse_connect {
            return Err(TransportError::Connect("connection refused".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.refuse_subscribe {
            return Err(TransportError::Rejected("subscribe refused".into()));
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.publish_calls += 1;
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.reject_publish {
            return Err(TransportError::Rejected("outgoing queue full".into()));
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<Inbound>, TransportError> {
        if !self.connected {
            return Err(TransportError::SessionLost("socket closed".into()));
        }
        Ok(self.inbound.pop_front())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Serial link fed from a queue; records every written line.
#[derive(Default)]
pub(crate) struct MockLink {
    pub(crate) incoming: VecDeque<String>,
    pub(crate) written: Vec<String>,
    pub(crate) fail_writes: bool,
}

impl MockLink {
    pub(crate) fn with_lines(lines: &[&str]) -> Self {
        Self {
            incoming: lines.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl SerialLink for MockLink {
    fn try_read_line(&mut self) -> Option<String> {
        self.incoming.pop_front()
    }

    async fn write_line(&mut self, line: &str) -> Result<(), GatewayError> {
        if self.fail_writes {
            return Err(GatewayError::Link(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link down",
            )));
        }
        self.written.push(line.to_string());
        Ok(())
    }
}

/// Clock whose millisecond counter only moves when told to.
pub(crate) struct ManualClock {
    now: Cell<u32>,
    stamp: RefCell<String>,
}

impl ManualClock {
    pub(crate) fn new(now: u32) -> Self {
        Self {
            now: Cell::new(now),
            stamp: RefCell::new("2025-06-01T08:00:00Z".to_string()),
        }
    }

    pub(crate) fn set(&self, now: u32) {
        self.now.set(now);
    }

    pub(crate) fn set_timestamp(&self, stamp: &str) {
        *self.stamp.borrow_mut() = stamp.to_string();
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }

    fn timestamp(&self) -> String {
        self.stamp.borrow().clone()
    }
}
