//! Operator commands (broker -> gateway -> sensor node) and sensor-node
//! error lines (sensor node -> gateway -> broker).

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::GatewayError;

/// Pump duration used when a `water` command carries no usable duration.
pub(crate) const DEFAULT_WATER_MS: u32 = 15_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    SendNow,
    Water { duration_ms: u32 },
    CalibrateDry,
    CalibrateWet,
    /// Anything the gateway does not understand; relayed untouched.
    Forward { raw: String },
}

impl Command {
    /// Text written to the serial link for commands the sensor node
    /// executes. `SendNow` is handled by the gateway and has none.
    pub(crate) fn serial_line(&self) -> Option<String> {
        match self {
            Self::SendNow => None,
            Self::Water { duration_ms } => Some(format!("water:{duration_ms}")),
            Self::CalibrateDry => Some("calDry".to_string()),
            Self::CalibrateWet => Some("calWet".to_string()),
            Self::Forward { raw } => Some(raw.clone()),
        }
    }
}

/// A line received from the sensor node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SensorEvent {
    /// Candidate telemetry; still has to pass [`crate::sample::parse_sample`].
    Telemetry(String),
    Error { code: String, delta: Option<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ErrorReport {
    pub(crate) level: &'static str,
    pub(crate) code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) delta: Option<f64>,
    pub(crate) timestamp: String,
}

impl ErrorReport {
    pub(crate) fn new(code: String, delta: Option<f64>, timestamp: String) -> Self {
        Self {
            level: "error",
            code,
            delta,
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound commands
// ---------------------------------------------------------------------------

/// Decode a commands-topic payload. Never fails: unknown input becomes
/// [`Command::Forward`] so it still reaches the sensor node.
pub(crate) fn decode(raw: &[u8], default_water_ms: u32) -> Command {
    let text = String::from_utf8_lossy(raw).trim().to_string();

    if let Some(cmd) = decode_structured(&text, default_water_ms) {
        return cmd;
    }

    match text.as_str() {
        "send_now" => Command::SendNow,
        "calDry" => Command::CalibrateDry,
        "calWet" => Command::CalibrateWet,
        _ => Command::Forward { raw: text },
    }
}

fn decode_structured(text: &str, default_water_ms: u32) -> Option<Command> {
    let doc: Value = serde_json::from_str(text).ok()?;
    let name = doc.get("cmd")?.as_str()?;

    match name {
        "send_now" => Some(Command::SendNow),
        "water" => Some(Command::Water {
            duration_ms: water_duration(doc.get("duration"), default_water_ms),
        }),
        "calDry" => Some(Command::CalibrateDry),
        "calWet" => Some(Command::CalibrateWet),
        _ => None,
    }
}

/// Positive integer milliseconds, or the default. The upper bound belongs to
/// the sensor node's pump.
fn water_duration(field: Option<&Value>, default_ms: u32) -> u32 {
    let Some(value) = field else {
        debug!(default_ms, "water: no duration given, using default");
        return default_ms;
    };

    match value.as_u64().map(u32::try_from) {
        Some(Ok(0)) => {
            debug!(default_ms, "water: zero duration, using default");
            default_ms
        }
        Some(Ok(ms)) => ms,
        Some(Err(_)) | None => {
            debug!(%value, default_ms, "water: unusable duration, using default");
            default_ms
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor-node lines
// ---------------------------------------------------------------------------

/// Classify a serial line. `err:<code>[:<delta>]` is an error report;
/// everything else is handed to the telemetry parser.
pub(crate) fn decode_sensor_line(line: &str) -> SensorEvent {
    let mut parts = line.splitn(3, ':');
    let (Some("err"), Some(code)) = (parts.next(), parts.next()) else {
        return SensorEvent::Telemetry(line.to_string());
    };

    let delta = parts.next().and_then(|d| d.trim().parse::<f64>().ok());
    SensorEvent::Error {
        code: code.trim().to_string(),
        delta,
    }
}

pub(crate) fn encode_error_report(report: &ErrorReport) -> Result<Vec<u8>, GatewayError> {
    Ok(serde_json::to_vec(report)?)
}

// ===========================================================================
// Tests
// ===========================================================================
