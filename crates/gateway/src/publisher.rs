//! Telemetry batching.
//!
//! Samples wait in a ring buffer until one of three things flushes them:
//! the buffer fills up (burst-on-full), the upload interval elapses, or an
//! operator sends `send_now`. A batch is cleared only after the broker
//! publish succeeded; a failed publish leaves buffer and timer untouched so
//! the same batch goes out on the next trigger.
//!
//! Under a long outage the buffer keeps overwriting its oldest samples. That
//! loss is accepted: the gateway has no durable storage and no way to slow
//! the sensor node down.

use tracing::{debug, info, warn};

use crate::clock::interval_elapsed;
use crate::connection::ConnectionManager;
use crate::error::GatewayError;
use crate::ring_buffer::{PushOutcome, RingBuffer};
use crate::sample::{encode_batch, Sample};
use crate::transport::Transport;

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    /// Nothing buffered; no publish was attempted.
    Empty,
    /// Batch of this many samples delivered; buffer cleared.
    Published(usize),
    /// Publish failed; batch kept for the next trigger.
    Deferred,
}

pub(crate) struct BatchPublisher {
    buffer: RingBuffer<Sample>,
    topic: String,
    upload_interval_ms: u32,
    max_batch_bytes: usize,
    last_flush: u32,
}

impl BatchPublisher {
    /// `now` starts the first upload window.
    pub(crate) fn new(
        capacity: usize,
        topic: String,
        upload_interval_ms: u32,
        max_batch_bytes: usize,
        now: u32,
    ) -> Self {
        Self {
            buffer: RingBuffer::new(capacity),
            topic,
            upload_interval_ms,
            max_batch_bytes,
            last_flush: now,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub(crate) fn last_flush(&self) -> u32 {
        self.last_flush
    }

    /// Buffer a sample. The push that fills the buffer flushes before this
    /// returns, so a failed burst cannot be skipped by a timer check later in
    /// the same loop iteration.
    pub(crate) async fn enqueue<T: Transport>(
        &mut self,
        sample: Sample,
        conn: &mut ConnectionManager<T>,
        now: u32,
    ) -> Result<Option<FlushOutcome>, GatewayError> {
        let capacity = self.buffer.capacity();
        match self.buffer.push(sample) {
            PushOutcome::Stored => {
                debug!(count = self.buffer.len(), capacity, "sample buffered");
                Ok(None)
            }
            PushOutcome::Overwrote => {
                debug!(capacity, "buffer full, oldest sample overwritten");
                Ok(None)
            }
            PushOutcome::BecameFull => {
                info!(capacity, "buffer full, sending burst");
                self.flush(conn, now).await.map(Some)
            }
        }
    }

    /// Flush when a full upload interval has passed since the last
    /// successful one, whatever the fill level.
    pub(crate) async fn maybe_flush_on_timer<T: Transport>(
        &mut self,
        conn: &mut ConnectionManager<T>,
        now: u32,
    ) -> Result<Option<FlushOutcome>, GatewayError> {
        if !interval_elapsed(now, self.last_flush, self.upload_interval_ms) {
            return Ok(None);
        }
        debug!(interval_ms = self.upload_interval_ms, "upload interval elapsed");
        self.flush(conn, now).await.map(Some)
    }

    pub(crate) async fn flush_now<T: Transport>(
        &mut self,
        conn: &mut ConnectionManager<T>,
        now: u32,
    ) -> Result<FlushOutcome, GatewayError> {
        self.flush(conn, now).await
    }

    async fn flush<T: Transport>(
        &mut self,
        conn: &mut ConnectionManager<T>,
        now: u32,
    ) -> Result<FlushOutcome, GatewayError> {
        if self.buffer.is_empty() {
            debug!("buffer empty, nothing to send");
            return Ok(FlushOutcome::Empty);
        }

        let count = self.buffer.len();
        let payload = encode_batch(self.buffer.snapshot(), self.max_batch_bytes)?;

        match conn.publish(&self.topic, &payload).await {
            Ok(()) => {
                self.buffer.reset();
                self.last_flush = now;
                info!(samples = count, bytes = payload.len(), "batch published");
                Ok(FlushOutcome::Published(count))
            }
            Err(e) => {
                warn!(samples = count, error = %e, "batch publish failed, keeping samples");
                Ok(FlushOutcome::Deferred)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> Vec<Sample> {
        self.buffer.snapshot().cloned().collect()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
