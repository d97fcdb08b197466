//! Sensor-node simulator: serves the serial line protocol over TCP so the
//! gateway can run end to end without hardware.

mod calibration;
mod protocol;
mod sim;

use anyhow::Result;
use std::{env, time::Duration};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use calibration::{light_percent, CalibrationStore};
use protocol::{parse_command, pump_report, telemetry_line, NodeCommand};
use sim::{PlantSim, Scenario};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn now_unix_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The simulated node: soil model plus persisted probe calibration.
struct Node {
    sim: PlantSim,
    calibration: CalibrationStore,
    /// Wait after the pump stops before re-reading the probe.
    settle: Duration,
}

impl Node {
    fn telemetry(&mut self) -> String {
        let humidity = self.calibration.current().percent(self.sim.sample_moisture());
        let light = light_percent(self.sim.read_light(now_unix_f64()));
        telemetry_line(humidity, light)
    }

    /// Run one command. Returns the line to send back, if any.
    async fn execute(&mut self, command: NodeCommand) -> Result<Option<String>> {
        match command {
            NodeCommand::CalibrateDry => {
                self.calibration.calibrate_dry(self.sim.read_moisture())?;
                Ok(None)
            }
            NodeCommand::CalibrateWet => {
                self.calibration.calibrate_wet(self.sim.read_moisture())?;
                Ok(None)
            }
            NodeCommand::Water { duration_ms } => {
                let cal = self.calibration.current();
                let before = cal.percent(self.sim.read_moisture());
                info!(duration_ms, before = %format!("{before:.1}"), "pump on");

                sleep(Duration::from_millis(u64::from(duration_ms))).await;
                self.sim.run_pump(duration_ms);
                sleep(self.settle).await;

                let after = cal.percent(self.sim.read_moisture());
                info!(
                    after = %format!("{after:.1}"),
                    delta = %format!("{:.1}", after - before),
                    "pump off"
                );
                Ok(pump_report(before, after))
            }
            NodeCommand::Unknown(line) => {
                warn!(line = %line, "unrecognised command");
                Ok(None)
            }
        }
    }
}

/// Serve one gateway connection until it closes. A watering blocks the
/// session for its whole duration, as the real node does.
async fn serve<R, W>(
    node: &mut Node,
    reader: R,
    mut writer: W,
    sample_every: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut ticker = interval(sample_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // first sample after one full period

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let line = node.telemetry();
                writer.write_all(format!("{line}\n").as_bytes()).await?;
                info!(line = %line, "telemetry sent");
            }
            incoming = lines.next_line() => {
                let Some(raw) = incoming? else {
                    return Ok(());
                };
                let command = parse_command(&raw);
                info!(?command, "command received");
                match node.execute(command).await {
                    Ok(Some(reply)) => {
                        writer.write_all(format!("{reply}\n").as_bytes()).await?;
                        warn!(reply = %reply, "error reported to gateway");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %format!("{e:#}"), "command failed"),
                }
            }
        }
        writer.flush().await?;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let listen = env::var("NODE_LISTEN").unwrap_or_else(|_| "127.0.0.1:7878".to_string());
    let sample_every_s: u64 = env_or("SAMPLE_EVERY_S", 10);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let diurnal_period_s: f64 = env_or("DIURNAL_PERIOD_S", 600.0);
    let settle_ms: u64 = env_or("PUMP_SETTLE_MS", 5000);
    let cal_path = env::var("CALIBRATION_PATH").unwrap_or_else(|_| "calibration.json".to_string());

    let calibration = CalibrationStore::load(cal_path);
    let cal = calibration.current();
    let mut node = Node {
        sim: PlantSim::new(scenario, f64::from(cal.dry), f64::from(cal.wet), diurnal_period_s),
        calibration,
        settle: Duration::from_millis(settle_ms),
    };

    let listener = TcpListener::bind(&listen).await?;
    info!(addr = %listen, %scenario, sample_every_s, "node simulator listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true).ok();
        info!(%peer, "gateway connected");

        let (reader, writer) = stream.into_split();
        match serve(&mut node, reader, writer, Duration::from_secs(sample_every_s.max(1))).await {
            Ok(()) => info!(%peer, "gateway disconnected"),
            Err(e) => warn!(%peer, error = %e, "session ended with error"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
