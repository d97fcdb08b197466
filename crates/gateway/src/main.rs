mod clock;
mod command;
mod config;
mod connection;
mod error;
mod gateway;
mod identity;
mod link;
mod mqtt;
mod publisher;
mod ring_buffer;
mod router;
mod sample;
#[cfg(test)]
mod testing;
mod transport;
mod trigger;

use anyhow::{Context, Result};
use std::{env, path::Path, time::Duration};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clock::{Clock, SystemClock};
use config::Config;
use connection::ConnectionManager;
use gateway::{Exit, Gateway, Settings};
use link::LineLink;
use mqtt::{MqttTransport, Topics};
use publisher::BatchPublisher;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        env::var("CONFIG_PATH").unwrap_or_else(|_| config::DEFAULT_CONFIG_PATH.to_string());

    // A reset goes back through full setup: config, identity, link, broker.
    loop {
        let cfg = config::load(&config_path)?;
        let gateway = build(&cfg).await?;

        match gateway.run().await.context("gateway loop failed")? {
            Exit::Reset => {
                info!("reset requested, re-running setup");
            }
            Exit::Shutdown => {
                info!("gateway stopped");
                return Ok(());
            }
        }
    }
}

async fn build(cfg: &Config) -> Result<Gateway<MqttTransport, LineLink, SystemClock>> {
    // ── Identity + topics ───────────────────────────────────────────
    let device_id = identity::resolve(Path::new(&cfg.device.identity_file), &cfg.device.id)?;
    let topics = Topics::new(&cfg.device.topic_prefix, &device_id);
    info!(
        device_id = %device_id,
        commands = %topics.commands,
        measurement = %topics.measurement,
        errors = %topics.errors,
        "topics ready"
    );

    // ── Serial link to the sensor node ──────────────────────────────
    let link = open_link(cfg).await;

    // ── Reset trigger ───────────────────────────────────────────────
    let trigger = trigger::open(&cfg.reset)?;

    // ── Broker ──────────────────────────────────────────────────────
    let transport = MqttTransport::new(
        &cfg.broker,
        Duration::from_millis(cfg.runtime.mqtt_poll_ms),
    );
    info!(
        host = %cfg.broker.host,
        port = cfg.broker.port,
        tls = cfg.broker.tls,
        "broker configured"
    );
    let conn = ConnectionManager::new(
        transport,
        topics.commands.clone(),
        cfg.connection.reconnect_backoff_ms,
    );

    // ── Batching ────────────────────────────────────────────────────
    let clock = SystemClock::new();
    let publisher = BatchPublisher::new(
        cfg.batch.capacity,
        topics.measurement.clone(),
        cfg.batch.upload_interval_ms,
        cfg.batch.max_batch_bytes,
        clock.now_ms(),
    );

    Ok(Gateway::new(
        conn,
        publisher,
        link,
        topics,
        trigger,
        clock,
        Settings {
            default_water_ms: cfg.commands.default_water_ms,
            inbound_per_tick: cfg.runtime.inbound_per_tick,
            loop_period: Duration::from_millis(cfg.runtime.loop_period_ms),
        },
    ))
}

/// The gateway is useless without its sensor node, so keep trying.
async fn open_link(cfg: &Config) -> LineLink {
    let retry = Duration::from_millis(cfg.runtime.link_retry_ms);
    loop {
        match link::open(&cfg.serial).await {
            Ok(link) => return link,
            Err(e) => {
                warn!(
                    error = %format!("{e:#}"),
                    retry_ms = retry.as_millis() as u64,
                    "serial link unavailable"
                );
                sleep(retry).await;
            }
        }
    }
}
