//! TOML config file loading, environment overrides and validation.
//!
//! Every field has a default, so a missing file or a partial one is fine.
//! Deployment-specific values (broker address, credentials, device id,
//! serial endpoint) can be overridden from the environment.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::command::DEFAULT_WATER_MS;
use crate::sample::{DEFAULT_MAX_BATCH_BYTES, SAMPLE_WIRE_BUDGET};

/// Config file used when `CONFIG_PATH` is not set.
pub(crate) const DEFAULT_CONFIG_PATH: &str = "gateway.toml";

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) device: DeviceConfig,
    pub(crate) broker: BrokerConfig,
    pub(crate) batch: BatchConfig,
    pub(crate) connection: ConnectionConfig,
    pub(crate) commands: CommandsConfig,
    pub(crate) serial: SerialConfig,
    pub(crate) reset: ResetConfig,
    pub(crate) runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct DeviceConfig {
    /// Identity written to `identity_file` on first boot.
    pub(crate) id: String,
    pub(crate) identity_file: String,
    pub(crate) topic_prefix: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "PLANT-9F7C".into(),
            identity_file: "plant_id.txt".into(),
            topic_prefix: "smartplant".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct BrokerConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) client_id: String,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) tls: bool,
    pub(crate) keep_alive_sec: u64,
    pub(crate) connect_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8883,
            client_id: "SmartPlantNode".into(),
            username: None,
            password: None,
            tls: true,
            keep_alive_sec: 30,
            connect_timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct BatchConfig {
    pub(crate) capacity: usize,
    pub(crate) upload_interval_ms: u32,
    pub(crate) max_batch_bytes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: 6,
            upload_interval_ms: 60_000,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ConnectionConfig {
    pub(crate) reconnect_backoff_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct CommandsConfig {
    pub(crate) default_water_ms: u32,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            default_water_ms: DEFAULT_WATER_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct SerialConfig {
    /// Node simulator address (default build).
    pub(crate) tcp_addr: String,
    /// UART device (`serial` feature).
    pub(crate) device: String,
    pub(crate) baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            tcp_addr: "127.0.0.1:7878".into(),
            device: "/dev/ttyS0".into(),
            baud_rate: 9600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ResetConfig {
    /// BCM pin of the reset button (`gpio` feature).
    pub(crate) gpio_pin: i64,
    /// Flag file polled instead of the pin in builds without `gpio`.
    pub(crate) trigger_file: String,
    pub(crate) debounce_ms: u32,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 4,
            trigger_file: "reset.flag".into(),
            debounce_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct RuntimeConfig {
    /// Pause between loop iterations.
    pub(crate) loop_period_ms: u64,
    /// Longest a single broker pump step may wait.
    pub(crate) mqtt_poll_ms: u64,
    /// Inbound messages handled per iteration at most.
    pub(crate) inbound_per_tick: usize,
    /// Delay between attempts to open the serial link at start-up.
    pub(crate) link_retry_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loop_period_ms: 10,
            mqtt_poll_ms: 5,
            inbound_per_tick: 8,
            link_retry_ms: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
const VALID_GPIO_PINS: std::ops::RangeInclusive<i64> = 2..=27;

/// Lower bound accepted by the MQTT client for a non-zero keep-alive.
const MIN_KEEP_ALIVE_SEC: u64 = 5;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub(crate) fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_device(&mut errors);
        self.validate_broker(&mut errors);
        self.validate_batch(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_serial(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        let d = &self.device;
        if d.id.trim().is_empty() {
            errors.push("device.id is empty".into());
        }
        if d.identity_file.trim().is_empty() {
            errors.push("device.identity_file is empty".into());
        }
        if d.topic_prefix.trim_matches('/').trim().is_empty() {
            errors.push("device.topic_prefix is empty".into());
        }
        if d.id.contains(['/', '+', '#']) {
            errors.push(format!(
                "device.id '{}' must not contain MQTT topic separators or wildcards",
                d.id
            ));
        }
    }

    fn validate_broker(&self, errors: &mut Vec<String>) {
        let b = &self.broker;
        if b.host.trim().is_empty() {
            errors.push("broker.host is empty".into());
        }
        if b.port == 0 {
            errors.push("broker.port must be non-zero".into());
        }
        if b.client_id.trim().is_empty() {
            errors.push("broker.client_id is empty".into());
        }
        if b.username.is_some() != b.password.is_some() {
            errors.push("broker.username and broker.password must be set together".into());
        }
        if b.keep_alive_sec < MIN_KEEP_ALIVE_SEC {
            errors.push(format!(
                "broker.keep_alive_sec must be at least {MIN_KEEP_ALIVE_SEC}, got {}",
                b.keep_alive_sec
            ));
        }
        if b.connect_timeout_ms == 0 {
            errors.push("broker.connect_timeout_ms must be positive".into());
        }
    }

    fn validate_batch(&self, errors: &mut Vec<String>) {
        let b = &self.batch;
        if b.capacity == 0 {
            errors.push("batch.capacity must be at least 1".into());
        } else {
            // Two brackets plus one worst-case sample record pair per slot.
            let worst_case = b.capacity.saturating_mul(SAMPLE_WIRE_BUDGET) + 2;
            if worst_case > b.max_batch_bytes {
                errors.push(format!(
                    "batch.capacity {} needs up to {worst_case} bytes, exceeding batch.max_batch_bytes ({})",
                    b.capacity, b.max_batch_bytes
                ));
            }
        }
        if b.upload_interval_ms == 0 {
            errors.push("batch.upload_interval_ms must be positive".into());
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        if self.connection.reconnect_backoff_ms == 0 {
            errors.push("connection.reconnect_backoff_ms must be positive".into());
        }
        if self.commands.default_water_ms == 0 {
            errors.push("commands.default_water_ms must be positive".into());
        }
        if self.runtime.loop_period_ms == 0 {
            errors.push("runtime.loop_period_ms must be positive".into());
        }
        if self.runtime.mqtt_poll_ms == 0 {
            errors.push("runtime.mqtt_poll_ms must be positive".into());
        }
        if self.runtime.inbound_per_tick == 0 {
            errors.push("runtime.inbound_per_tick must be at least 1".into());
        }
        if !VALID_GPIO_PINS.contains(&self.reset.gpio_pin) {
            errors.push(format!(
                "reset.gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                self.reset.gpio_pin
            ));
        }
        if self.reset.trigger_file.trim().is_empty() {
            errors.push("reset.trigger_file is empty".into());
        }
    }

    fn validate_serial(&self, errors: &mut Vec<String>) {
        let s = &self.serial;
        if cfg!(feature = "serial") {
            if s.device.trim().is_empty() {
                errors.push("serial.device is empty".into());
            }
            if s.baud_rate == 0 {
                errors.push("serial.baud_rate must be positive".into());
            }
        } else if s.tcp_addr.trim().is_empty() {
            errors.push("serial.tcp_addr is empty".into());
        }
    }

    /// Apply deployment overrides from the environment.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("MQTT_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = var("MQTT_PORT") {
            self.broker.port = port
                .trim()
                .parse()
                .with_context(|| format!("MQTT_PORT is not a valid port: {port}"))?;
        }
        if let Some(user) = var("MQTT_USERNAME") {
            self.broker.username = Some(user);
        }
        if let Some(pass) = var("MQTT_PASSWORD") {
            self.broker.password = Some(pass);
        }
        if let Some(id) = var("DEVICE_ID") {
            self.device.id = id;
        }
        if let Some(addr) = var("SERIAL_TCP_ADDR") {
            self.serial.tcp_addr = addr;
        }
        if let Some(dev) = var("SERIAL_DEVICE") {
            self.serial.device = dev;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, override and validate the config. A missing file yields the
/// defaults.
pub(crate) fn load(path: &str) -> Result<Config> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => {
            toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path, "no config file, using defaults");
            Config::default()
        }
        Err(e) => return Err(e).with_context(|| format!("failed to read config: {path}")),
    };

    config.apply_env(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_empty_config_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.device.id, "PLANT-9F7C");
        assert_eq!(config.device.topic_prefix, "smartplant");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.client_id, "SmartPlantNode");
        assert_eq!(config.batch.capacity, 6);
        assert_eq!(config.batch.upload_interval_ms, 60_000);
        assert_eq!(config.batch.max_batch_bytes, 1024);
        assert_eq!(config.connection.reconnect_backoff_ms, 5000);
        assert_eq!(config.commands.default_water_ms, 15_000);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.reset.debounce_ms, 50);
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[broker]
host = "broker.example.net"
port = 1883
tls = false
username = "gw"
password = "secret"

[batch]
capacity = 3
upload_interval_ms = 10000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.broker.host, "broker.example.net");
        assert_eq!(config.broker.port, 1883);
        assert!(!config.broker.tls);
        assert_eq!(config.broker.username.as_deref(), Some("gw"));
        assert_eq!(config.broker.client_id, "SmartPlantNode");
        assert_eq!(config.batch.capacity, 3);
        assert_eq!(config.batch.max_batch_bytes, 1024);
        config.validate().unwrap();
    }

    #[test]
    fn parse_rejects_wrong_types() {
        assert!(toml::from_str::<Config>("[batch]\ncapacity = \"six\"").is_err());
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn default_config_passes() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut cfg = Config::default();
        cfg.batch.capacity = 0;
        assert_validation_err(&cfg, "batch.capacity must be at least 1");
    }

    #[test]
    fn capacity_must_fit_envelope() {
        let mut cfg = Config::default();
        cfg.batch.capacity = 7;
        assert_validation_err(&cfg, "exceeding batch.max_batch_bytes (1024)");

        cfg.batch.max_batch_bytes = 7 * SAMPLE_WIRE_BUDGET + 2;
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_intervals_rejected() {
        let mut cfg = Config::default();
        cfg.batch.upload_interval_ms = 0;
        cfg.connection.reconnect_backoff_ms = 0;
        assert_validation_err(&cfg, "upload_interval_ms must be positive");
        assert_validation_err(&cfg, "reconnect_backoff_ms must be positive");
    }

    #[test]
    fn empty_names_rejected() {
        let mut cfg = Config::default();
        cfg.broker.host = " ".into();
        cfg.broker.client_id = String::new();
        cfg.device.topic_prefix = "/".into();
        assert_validation_err(&cfg, "broker.host is empty");
        assert_validation_err(&cfg, "broker.client_id is empty");
        assert_validation_err(&cfg, "device.topic_prefix is empty");
    }

    #[test]
    fn device_id_with_wildcard_rejected() {
        let mut cfg = Config::default();
        cfg.device.id = "plant/+".into();
        assert_validation_err(&cfg, "must not contain MQTT topic separators");
    }

    #[test]
    fn half_credentials_rejected() {
        let mut cfg = Config::default();
        cfg.broker.username = Some("gw".into());
        assert_validation_err(&cfg, "must be set together");
    }

    #[test]
    fn short_keep_alive_rejected() {
        let mut cfg = Config::default();
        cfg.broker.keep_alive_sec = 1;
        assert_validation_err(&cfg, "keep_alive_sec must be at least 5");
    }

    #[test]
    fn reset_pin_outside_header_rejected() {
        let mut cfg = Config::default();
        cfg.reset.gpio_pin = 1;
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
        cfg.reset.gpio_pin = 28;
        assert_validation_err(&cfg, "not a valid BCM GPIO pin");
        cfg.reset.gpio_pin = 27;
        cfg.validate().unwrap();
    }

    #[cfg(not(feature = "serial"))]
    #[test]
    fn empty_serial_endpoint_rejected() {
        let mut cfg = Config::default();
        cfg.serial.tcp_addr = String::new();
        assert_validation_err(&cfg, "serial.tcp_addr is empty");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.batch.capacity = 0;
        cfg.broker.host = String::new();
        cfg.runtime.inbound_per_tick = 0;

        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "got: {msg}");
        assert!(msg.contains("batch.capacity"), "got: {msg}");
        assert!(msg.contains("broker.host"), "got: {msg}");
        assert!(msg.contains("inbound_per_tick"), "got: {msg}");
    }

    // -- Environment overrides --------------------------------------------

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("MQTT_HOST", "10.0.0.5"),
            ("MQTT_PORT", "1883"),
            ("MQTT_USERNAME", "gw"),
            ("MQTT_PASSWORD", "pw"),
            ("DEVICE_ID", "PLANT-0001"),
            ("SERIAL_TCP_ADDR", "10.0.0.6:7878"),
        ]))
        .unwrap();

        assert_eq!(cfg.broker.host, "10.0.0.5");
        assert_eq!(cfg.broker.port, 1883);
        assert_eq!(cfg.broker.username.as_deref(), Some("gw"));
        assert_eq!(cfg.broker.password.as_deref(), Some("pw"));
        assert_eq!(cfg.device.id, "PLANT-0001");
        assert_eq!(cfg.serial.tcp_addr, "10.0.0.6:7878");
        cfg.validate().unwrap();
    }

    #[test]
    fn env_bad_port_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg.apply_env(env(&[("MQTT_PORT", "eighty")])).unwrap_err();
        assert!(format!("{err:#}").contains("MQTT_PORT"));
    }

    // -- Loading ----------------------------------------------------------

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let cfg = load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.batch.capacity, 6);
    }

    #[test]
    fn load_reads_and_validates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[batch]\ncapacity = 2\nupload_interval_ms = 500").unwrap();

        let cfg = load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.batch.capacity, 2);
        assert_eq!(cfg.batch.upload_interval_ms, 500);
    }

    #[test]
    fn load_reports_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[batch]\ncapacity = 0").unwrap();

        let err = load(file.path().to_str().unwrap()).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("invalid config"), "got: {msg}");
        assert!(msg.contains("batch.capacity"), "got: {msg}");
    }
}
