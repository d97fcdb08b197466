//! Dispatch of decoded commands and sensor-node lines.

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::command::{decode, encode_error_report, Command, ErrorReport, SensorEvent};
use crate::connection::ConnectionManager;
use crate::error::GatewayError;
use crate::link::SerialLink;
use crate::mqtt::Topics;
use crate::publisher::{BatchPublisher, FlushOutcome};
use crate::sample::parse_sample;
use crate::transport::{Inbound, Transport};

/// Short-lived view over the gateway parts a command can touch.
///
/// Only batch encoding failures ([`GatewayError::EncodeOverflow`] and
/// [`GatewayError::Encode`]) are returned; every other failure is logged and
/// dropped here.
pub(crate) struct CommandRouter<'a, T, L> {
    pub(crate) publisher: &'a mut BatchPublisher,
    pub(crate) conn: &'a mut ConnectionManager<T>,
    pub(crate) link: &'a mut L,
    pub(crate) topics: &'a Topics,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) default_water_ms: u32,
}

impl<T: Transport, L: SerialLink> CommandRouter<'_, T, L> {
    /// A message from the broker. Anything outside the commands topic is
    /// ignored.
    pub(crate) async fn handle_inbound(&mut self, msg: Inbound) -> Result<(), GatewayError> {
        if msg.topic != self.topics.commands {
            debug!(topic = %msg.topic, "ignoring message on foreign topic");
            return Ok(());
        }
        let command = decode(&msg.payload, self.default_water_ms);
        info!(?command, "command received");
        self.handle(command).await
    }

    pub(crate) async fn handle(&mut self, command: Command) -> Result<(), GatewayError> {
        let Some(line) = command.serial_line() else {
            // SendNow: the only command the gateway executes itself.
            let now = self.clock.now_ms();
            match self.publisher.flush_now(self.conn, now).await? {
                FlushOutcome::Empty => info!("send_now: nothing buffered"),
                FlushOutcome::Published(n) => info!(samples = n, "send_now: batch sent"),
                FlushOutcome::Deferred => warn!("send_now: broker unavailable, batch kept"),
            }
            return Ok(());
        };

        if let Err(e) = self.link.write_line(&line).await {
            warn!(line = %line, error = %e, "could not forward command to sensor node");
        }
        Ok(())
    }

    /// A line from the sensor node.
    pub(crate) async fn handle_sensor_event(
        &mut self,
        event: SensorEvent,
    ) -> Result<(), GatewayError> {
        match event {
            SensorEvent::Telemetry(line) => {
                let sample = match parse_sample(&line, &self.clock.timestamp()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(line = %line, error = %e, "dropping telemetry line");
                        return Ok(());
                    }
                };
                let now = self.clock.now_ms();
                self.publisher.enqueue(sample, self.conn, now).await?;
            }
            SensorEvent::Error { code, delta } => {
                warn!(code = %code, ?delta, "sensor node reported error");
                let report = ErrorReport::new(code, delta, self.clock.timestamp());
                let delivered = match encode_error_report(&report) {
                    Ok(payload) => self.conn.publish(&self.topics.errors, &payload).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = delivered {
                    warn!(error = %e, "error report not delivered");
                }
            }
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
