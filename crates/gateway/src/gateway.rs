//! The cooperative loop.
//!
//! One `Gateway` owns every piece of runtime state. Each iteration runs the
//! same fixed sequence of non-blocking steps; see [`Gateway::tick`].

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::command::decode_sensor_line;
use crate::connection::ConnectionManager;
use crate::error::GatewayError;
use crate::link::SerialLink;
use crate::mqtt::Topics;
use crate::publisher::BatchPublisher;
use crate::router::CommandRouter;
use crate::transport::Transport;
use crate::trigger::ResetTrigger;

/// What a single iteration asks of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    Reset,
}

/// Why [`Gateway::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    /// Reset trigger fired; rebuild from configuration.
    Reset,
    /// Ctrl-C.
    Shutdown,
}

pub(crate) struct Settings {
    pub(crate) default_water_ms: u32,
    pub(crate) inbound_per_tick: usize,
    pub(crate) loop_period: Duration,
}

pub(crate) struct Gateway<T, L, C> {
    conn: ConnectionManager<T>,
    publisher: BatchPublisher,
    link: L,
    topics: Topics,
    trigger: ResetTrigger,
    clock: C,
    settings: Settings,
}

impl<T: Transport, L: SerialLink, C: Clock> Gateway<T, L, C> {
    pub(crate) fn new(
        conn: ConnectionManager<T>,
        publisher: BatchPublisher,
        link: L,
        topics: Topics,
        trigger: ResetTrigger,
        clock: C,
        settings: Settings,
    ) -> Self {
        Self {
            conn,
            publisher,
            link,
            topics,
            trigger,
            clock,
            settings,
        }
    }

    fn router(&mut self) -> CommandRouter<'_, T, L> {
        CommandRouter {
            publisher: &mut self.publisher,
            conn: &mut self.conn,
            link: &mut self.link,
            topics: &self.topics,
            clock: &self.clock,
            default_water_ms: self.settings.default_water_ms,
        }
    }

    /// One loop iteration:
    /// 1. keep the broker session up (rate limited),
    /// 2. handle queued broker messages, at most `inbound_per_tick`,
    /// 3. check the reset trigger,
    /// 4. flush on the upload timer,
    /// 5. handle at most one sensor-node line.
    pub(crate) async fn tick(&mut self) -> Result<Step, GatewayError> {
        let now = self.clock.now_ms();
        self.conn.ensure_connected(now).await;

        for _ in 0..self.settings.inbound_per_tick {
            let Some(msg) = self.conn.poll_inbound().await else {
                break;
            };
            self.router().handle_inbound(msg).await?;
        }

        let now = self.clock.now_ms();
        if self.trigger.poll(now) {
            return Ok(Step::Reset);
        }

        self.publisher
            .maybe_flush_on_timer(&mut self.conn, now)
            .await?;

        if let Some(line) = self.link.try_read_line() {
            debug!(line = %line, "serial in");
            self.router()
                .handle_sensor_event(decode_sensor_line(&line))
                .await?;
        }

        Ok(Step::Continue)
    }

    /// Run until the reset trigger fires or Ctrl-C. The broker session is
    /// closed either way.
    pub(crate) async fn run(mut self) -> Result<Exit, GatewayError> {
        let mut period = tokio::time::interval(self.settings.loop_period);
        period.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!(
            commands = %self.topics.commands,
            period_ms = self.settings.loop_period.as_millis() as u64,
            "gateway loop started"
        );

        let exit = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break Exit::Shutdown;
                }
                _ = period.tick() => {
                    match self.tick().await {
                        Ok(Step::Continue) => {}
                        Ok(Step::Reset) => break Exit::Reset,
                        Err(e) => {
                            self.conn.disconnect().await;
                            return Err(e);
                        }
                    }
                }
            }
        };

        self.conn.disconnect().await;
        Ok(exit)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
