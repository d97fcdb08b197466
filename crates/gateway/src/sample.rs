//! Telemetry samples: the sensor-node line format in, the broker batch
//! format out.
//!
//! Inbound (one serial line):
//!
//! ```text
//! {"humidity":41.7,"light":63.0}
//! ```
//!
//! Outbound (one publish on `…/measurement`), two flattened records per
//! sample, oldest sample first:
//!
//! ```text
//! [{"type":"humidity","value":41.7,"timestamp":"2025-06-01T08:00:00Z"},
//!  {"type":"light","value":63.0,"timestamp":"2025-06-01T08:00:00Z"}, …]
//! ```

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::GatewayError;

/// Longest telemetry line the sensor node is allowed to send.
pub(crate) const MAX_TELEMETRY_LINE: usize = 64;

/// Default size budget for one encoded batch (matches the MQTT packet
/// buffer of the gateway hardware).
pub(crate) const DEFAULT_MAX_BATCH_BYTES: usize = 1024;

/// Readings are percentages; anything outside this range is rejected.
pub(crate) const VALUE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=100.0;

/// Upper bound used when checking that a buffer capacity fits the batch
/// envelope. The widest sample [`parse_sample`] can produce is two records
/// with a 20-character timestamp and `100.0` as the value: 68 + 65 bytes
/// plus two separators.
pub(crate) const SAMPLE_WIRE_BUDGET: usize = 160;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sample {
    /// Percent, or NaN when the sensor could not be read.
    pub(crate) humidity: f32,
    /// Percent.
    pub(crate) light: f32,
    /// Receiver-side UTC stamp, `YYYY-MM-DDTHH:MM:SSZ`.
    pub(crate) timestamp: String,
}

#[derive(Deserialize)]
struct TelemetryLine {
    /// `null` when the node could not read the probe; the key itself is
    /// still required.
    #[serde(deserialize_with = "nan_if_null")]
    humidity: f32,
    light: f32,
}

fn nan_if_null<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
    Ok(Option::<f32>::deserialize(d)?.unwrap_or(f32::NAN))
}

#[derive(Serialize)]
struct Record<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: Option<f64>,
    timestamp: &'a str,
}

/// Parse one telemetry line. `timestamp` is stamped by the caller at
/// receive time; the sender never supplies one.
pub(crate) fn parse_sample(line: &str, timestamp: &str) -> Result<Sample, GatewayError> {
    if line.len() > MAX_TELEMETRY_LINE {
        return Err(GatewayError::MalformedPayload(format!(
            "telemetry line is {} bytes (max {MAX_TELEMETRY_LINE})",
            line.len()
        )));
    }

    let parsed: TelemetryLine = serde_json::from_str(line)
        .map_err(|e| GatewayError::MalformedPayload(format!("bad telemetry json: {e}")))?;

    // NaN is the unreadable-probe marker and passes through.
    if !parsed.humidity.is_nan() && !VALUE_RANGE.contains(&parsed.humidity) {
        return Err(out_of_range("humidity", parsed.humidity));
    }
    if !VALUE_RANGE.contains(&parsed.light) {
        return Err(out_of_range("light", parsed.light));
    }

    Ok(Sample {
        humidity: parsed.humidity,
        light: parsed.light,
        timestamp: timestamp.to_string(),
    })
}

fn out_of_range(field: &str, value: f32) -> GatewayError {
    GatewayError::MalformedPayload(format!("{field} {value} outside 0-100"))
}

/// Encode samples into the flattened batch array, preserving order.
///
/// Fails with [`GatewayError::EncodeOverflow`] rather than truncating when
/// the result would exceed `max_bytes`.
pub(crate) fn encode_batch<'a, I>(samples: I, max_bytes: usize) -> Result<Vec<u8>, GatewayError>
where
    I: IntoIterator<Item = &'a Sample>,
{
    let records: Vec<Record<'_>> = samples
        .into_iter()
        .flat_map(|s| {
            [
                Record {
                    kind: "humidity",
                    value: one_decimal(s.humidity),
                    timestamp: &s.timestamp,
                },
                Record {
                    kind: "light",
                    value: one_decimal(s.light),
                    timestamp: &s.timestamp,
                },
            ]
        })
        .collect();

    let payload = serde_json::to_vec(&records)?;

    if payload.len() > max_bytes {
        return Err(GatewayError::EncodeOverflow {
            size: payload.len(),
            max: max_bytes,
        });
    }
    Ok(payload)
}

/// Round to one decimal place for the wire. Non-finite values become
/// `null`.
fn one_decimal(v: f32) -> Option<f64> {
    if !v.is_finite() {
        return None;
    }
    Some((f64::from(v) * 10.0).round() / 10.0)
}

// ===========================================================================
// Tests
// ===========================================================================
