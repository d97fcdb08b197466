//! Node side of the serial line protocol.
//!
//! Gateway -> node: `calDry`, `calWet`, `water`, `water:<ms>`, `water <ms>`.
//! Node -> gateway: `{"humidity":<h>,"light":<l>}`, `err:sensor`,
//! `err:pump:<delta>`.

/// Pump run time when a water command carries no usable duration.
pub(crate) const DEFAULT_WATER_MS: u32 = 15_000;

/// Longest the pump may run for a single command.
pub(crate) const PUMP_TIMEOUT_MS: u32 = 60_000;

/// Minimum moisture gain (percentage points) for a watering to count as
/// successful.
pub(crate) const PUMP_OK_DELTA: f32 = 1.0;

/// The gateway rejects telemetry lines longer than this.
pub(crate) const MAX_LINE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeCommand {
    CalibrateDry,
    CalibrateWet,
    Water { duration_ms: u32 },
    Unknown(String),
}

pub(crate) fn parse_command(line: &str) -> NodeCommand {
    let line = line.trim();
    match line {
        "calDry" => return NodeCommand::CalibrateDry,
        "calWet" => return NodeCommand::CalibrateWet,
        "water" => {
            return NodeCommand::Water {
                duration_ms: DEFAULT_WATER_MS,
            }
        }
        _ => {}
    }

    match line.strip_prefix("water") {
        Some(rest) if rest.starts_with([':', ' ']) => NodeCommand::Water {
            duration_ms: water_duration(&rest[1..]),
        },
        _ => NodeCommand::Unknown(line.to_string()),
    }
}

/// Leading decimal digits of `arg`, in milliseconds. Zero or no digits
/// gives the default; anything past the pump timeout is clamped to it.
fn water_duration(arg: &str) -> u32 {
    let arg = arg.trim_start();
    let end = arg
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(arg.len());
    let digits = &arg[..end];

    if digits.is_empty() {
        return DEFAULT_WATER_MS;
    }
    match digits.parse::<u64>() {
        Ok(0) => DEFAULT_WATER_MS,
        Ok(ms) => ms.min(u64::from(PUMP_TIMEOUT_MS)) as u32,
        // More digits than fit in a u64: certainly past the timeout.
        Err(_) => PUMP_TIMEOUT_MS,
    }
}

/// One telemetry line, values with one decimal. An unreadable probe is
/// sent as `null`.
pub(crate) fn telemetry_line(humidity: f32, light: f32) -> String {
    let line = format!(
        r#"{{"humidity":{},"light":{}}}"#,
        json_number(humidity),
        json_number(light)
    );
    debug_assert!(line.len() <= MAX_LINE);
    line
}

fn json_number(v: f32) -> String {
    if v.is_finite() {
        format!("{v:.1}")
    } else {
        "null".to_string()
    }
}

/// Verdict on a watering from the moisture before and after. `None` when
/// the pump did its job.
pub(crate) fn pump_report(before: f32, after: f32) -> Option<String> {
    if before.is_nan() || after.is_nan() {
        return Some("err:sensor".to_string());
    }
    let delta = after - before;
    if delta < PUMP_OK_DELTA {
        Some(format!("err:pump:{delta:.1}"))
    } else {
        None
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn water(ms: u32) -> NodeCommand {
        NodeCommand::Water { duration_ms: ms }
    }

    // -- parse_command ------------------------------------------------------

    #[test]
    fn calibration_commands() {
        assert_eq!(parse_command("calDry"), NodeCommand::CalibrateDry);
        assert_eq!(parse_command(" calWet\r"), NodeCommand::CalibrateWet);
    }

    #[test]
    fn water_with_either_separator() {
        assert_eq!(parse_command("water:5000"), water(5000));
        assert_eq!(parse_command("water 2500"), water(2500));
    }

    #[test]
    fn water_without_duration_uses_default() {
        assert_eq!(parse_command("water"), water(DEFAULT_WATER_MS));
        assert_eq!(parse_command("water:"), water(DEFAULT_WATER_MS));
    }

    #[test]
    fn water_zero_or_garbage_uses_default() {
        assert_eq!(parse_command("water:0"), water(DEFAULT_WATER_MS));
        assert_eq!(parse_command("water:abc"), water(DEFAULT_WATER_MS));
        assert_eq!(parse_command("water:-5"), water(DEFAULT_WATER_MS));
    }

    #[test]
    fn water_reads_leading_digits() {
        assert_eq!(parse_command("water:1200ms"), water(1200));
        assert_eq!(parse_command("water: 800"), water(800));
    }

    #[test]
    fn water_is_clamped_to_pump_timeout() {
        assert_eq!(parse_command("water:60000"), water(60_000));
        assert_eq!(parse_command("water:60001"), water(PUMP_TIMEOUT_MS));
        assert_eq!(
            parse_command("water:99999999999999999999999"),
            water(PUMP_TIMEOUT_MS)
        );
    }

    #[test]
    fn unknown_commands() {
        assert_eq!(
            parse_command("waterfall"),
            NodeCommand::Unknown("waterfall".into())
        );
        assert_eq!(parse_command("reboot"), NodeCommand::Unknown("reboot".into()));
        assert_eq!(parse_command("caldry"), NodeCommand::Unknown("caldry".into()));
    }

    // -- telemetry_line -----------------------------------------------------

    #[test]
    fn telemetry_uses_one_decimal() {
        assert_eq!(
            telemetry_line(41.66, 63.0),
            r#"{"humidity":41.7,"light":63.0}"#
        );
    }

    #[test]
    fn telemetry_nan_humidity_is_null() {
        assert_eq!(
            telemetry_line(f32::NAN, 5.0),
            r#"{"humidity":null,"light":5.0}"#
        );
    }

    #[test]
    fn telemetry_full_scale_fits_line_budget() {
        let line = telemetry_line(100.0, 100.0);
        assert!(line.len() <= MAX_LINE);
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["humidity"], 100.0);
    }

    // -- pump_report --------------------------------------------------------

    #[test]
    fn healthy_watering_reports_nothing() {
        assert_eq!(pump_report(30.0, 45.0), None);
        assert_eq!(pump_report(30.0, 31.0), None);
    }

    #[test]
    fn small_gain_is_a_pump_error() {
        assert_eq!(pump_report(30.0, 30.7).as_deref(), Some("err:pump:0.7"));
        assert_eq!(pump_report(30.0, 28.0).as_deref(), Some("err:pump:-2.0"));
    }

    #[test]
    fn unreadable_probe_is_a_sensor_error() {
        assert_eq!(pump_report(f32::NAN, 40.0).as_deref(), Some("err:sensor"));
        assert_eq!(pump_report(40.0, f32::NAN).as_deref(), Some("err:sensor"));
    }
}
