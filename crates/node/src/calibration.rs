//! Two-point soil probe calibration, persisted to a JSON file (the node's
//! EEPROM stand-in).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::sim::ADC_MAX;

/// Factory calibration used until the probe is calibrated in place.
pub(crate) const DRY_DEFAULT: u16 = 786;
pub(crate) const WET_DEFAULT: u16 = 384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Calibration {
    /// Raw reading with the probe in dry air.
    pub(crate) dry: u16,
    /// Raw reading with the probe in water.
    pub(crate) wet: u16,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            dry: DRY_DEFAULT,
            wet: WET_DEFAULT,
        }
    }
}

impl Calibration {
    /// Soil moisture in percent, clamped to 0-100. NaN when the calibration
    /// is unusable (`dry <= wet`).
    pub(crate) fn percent(&self, raw: u16) -> f32 {
        if self.dry <= self.wet {
            return f32::NAN;
        }
        let span = f32::from(self.dry - self.wet);
        let pct = 100.0 * (f32::from(self.dry) - f32::from(raw)) / span;
        pct.clamp(0.0, 100.0)
    }
}

/// Light in percent: a bright sensor reads low.
pub(crate) fn light_percent(raw: u16) -> f32 {
    (100.0 - 100.0 * f32::from(raw) / f32::from(ADC_MAX)).clamp(0.0, 100.0)
}

pub(crate) struct CalibrationStore {
    path: PathBuf,
    current: Calibration,
}

impl CalibrationStore {
    /// Load the stored calibration. A missing or unreadable file falls back
    /// to the factory values.
    pub(crate) fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(cal) => cal,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt calibration, using defaults");
                    Calibration::default()
                }
            },
            Err(_) => Calibration::default(),
        };
        info!(dry = current.dry, wet = current.wet, "calibration loaded");
        Self { path, current }
    }

    pub(crate) fn current(&self) -> Calibration {
        self.current
    }

    pub(crate) fn calibrate_dry(&mut self, raw: u16) -> Result<()> {
        self.current.dry = raw;
        self.save()
    }

    pub(crate) fn calibrate_wet(&mut self, raw: u16) -> Result<()> {
        self.current.wet = raw;
        self.save()
    }

    fn save(&self) -> Result<()> {
        write_json(&self.path, &self.current)?;
        info!(dry = self.current.dry, wet = self.current.wet, "calibration saved");
        Ok(())
    }
}

fn write_json(path: &Path, cal: &Calibration) -> Result<()> {
    let json = serde_json::to_vec_pretty(cal).context("failed to encode calibration")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write calibration: {}", path.display()))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_spans_dry_to_wet() {
        let cal = Calibration::default();
        assert_eq!(cal.percent(DRY_DEFAULT), 0.0);
        assert_eq!(cal.percent(WET_DEFAULT), 100.0);
        let mid = cal.percent((DRY_DEFAULT + WET_DEFAULT) / 2);
        assert!((mid - 50.0).abs() < 0.5, "mid = {mid}");
    }

    #[test]
    fn percent_clamps_outside_range() {
        let cal = Calibration::default();
        assert_eq!(cal.percent(1000), 0.0);
        assert_eq!(cal.percent(10), 100.0);
    }

    #[test]
    fn degenerate_calibration_is_nan() {
        let cal = Calibration { dry: 500, wet: 500 };
        assert!(cal.percent(500).is_nan());
        let inverted = Calibration { dry: 300, wet: 700 };
        assert!(inverted.percent(500).is_nan());
    }

    #[test]
    fn light_percent_is_inverted() {
        assert_eq!(light_percent(0), 100.0);
        assert_eq!(light_percent(ADC_MAX), 0.0);
        assert!((light_percent(512) - 50.0).abs() < 0.1);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::load(dir.path().join("cal.json"));
        assert_eq!(store.current(), Calibration::default());
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert_eq!(CalibrationStore::load(&path).current(), Calibration::default());
    }

    #[test]
    fn calibration_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cal.json");

        let mut store = CalibrationStore::load(&path);
        store.calibrate_dry(800).unwrap();
        store.calibrate_wet(350).unwrap();

        let reloaded = CalibrationStore::load(&path);
        assert_eq!(reloaded.current(), Calibration { dry: 800, wet: 350 });
    }

    #[test]
    fn save_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CalibrationStore::load(dir.path().join("nope").join("cal.json"));
        let err = store.calibrate_dry(800).unwrap_err();
        assert!(format!("{err:#}").contains("failed to write calibration"));
    }
}
