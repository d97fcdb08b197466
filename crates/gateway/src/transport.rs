use crate::error::TransportError;

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Inbound {
    pub(crate) topic: String,
    pub(crate) payload: Vec<u8>,
}

/// Broker session seen from the connection state machine.
///
/// Implementations must never block indefinitely: `connect` is bounded by a
/// timeout and `poll` returns `Ok(None)` when nothing is ready.
pub(crate) trait Transport {
    /// Open a fresh session, replacing any previous one.
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Single best-effort publish; `Ok` once the packet has been handed to
    /// the network.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Next inbound message, if one is ready.
    async fn poll(&mut self) -> Result<Option<Inbound>, TransportError>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self);
}
