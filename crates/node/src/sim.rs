//! Stateful plant simulator for local development.
//!
//! Models the sensor node's two analog inputs:
//! - soil moisture on a 10-bit ADC (higher raw = drier), evolving as a
//!   random walk with mean reversion, evaporation drift, electronic noise
//!   and occasional spikes;
//! - ambient light on a 10-bit ADC (higher raw = darker), following a
//!   day/night cycle;
//! - a pump whose effect on soil moisture scales with run time.

use std::fmt;

/// Full scale of the node's 10-bit ADC.
pub(crate) const ADC_MAX: u16 = 1023;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scenario {
    /// Starts mid-range, slow drift toward dry. Moderate noise, ~3% spikes.
    Drying,
    /// Hovers near the centre. Low noise, rare spikes.
    Stable,
    /// High noise, ~10% spikes of larger magnitude. Exercises the
    /// gateway's handling of odd readings.
    Flaky,
    /// Starts near the wet end and dries very slowly.
    Wet,
    /// Like `Drying`, but the pump moves no water, so every watering
    /// command ends in `err:pump:<delta>`.
    PumpFault,
}

impl Scenario {
    pub(crate) fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            "pump-fault" => Self::PumpFault,
            _ => Self::Drying, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
            Self::PumpFault => write!(f, "pump-fault"),
        }
    }
}

/// Scenario parameters, as fractions of the dry-wet range where they are
/// distances.
struct Profile {
    drift: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
    /// 0.0 = at raw_wet (wettest), 1.0 = at raw_dry (driest).
    start_frac: f64,
    pump_works: bool,
}

impl Scenario {
    fn profile(self) -> Profile {
        let (drift, walk_sigma, mean_reversion, noise_sigma, spike_prob, spike_sigma, start_frac) =
            match self {
                Self::Drying | Self::PumpFault => (0.0011, 0.011, 0.02, 0.0057, 0.03, 0.14, 0.5),
                Self::Stable => (0.00015, 0.0043, 0.05, 0.0029, 0.005, 0.07, 0.5),
                Self::Flaky => (0.0007, 0.018, 0.02, 0.014, 0.10, 0.21, 0.5),
                Self::Wet => (0.0002, 0.0057, 0.02, 0.0043, 0.02, 0.11, 0.2),
            };
        Profile {
            drift,
            walk_sigma,
            mean_reversion,
            noise_sigma,
            spike_prob,
            spike_sigma,
            start_frac,
            pump_works: self != Self::PumpFault,
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub(crate) struct PlantSim {
    /// Current "true" soil moisture in ADC units. Evolves each sample.
    base: f64,

    raw_dry: f64,
    raw_wet: f64,
    center: f64,

    // Random walk parameters (ADC units)
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,

    // Per-reading noise and spikes (ADC units)
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,

    // Pump response
    pump_works: bool,
    wet_per_sec: f64,

    diurnal_period_s: f64,
}

impl PlantSim {
    /// `raw_dry` / `raw_wet` are the probe's ADC readings in dry air and in
    /// water (around 786 / 384 for a capacitive probe on a 5 V 10-bit ADC).
    ///
    /// `diurnal_period_s` is the length of one simulated day. Use 600 for
    /// fast iteration or 86400 for real time.
    pub(crate) fn new(scenario: Scenario, raw_dry: f64, raw_wet: f64, diurnal_period_s: f64) -> Self {
        let range = raw_dry - raw_wet;
        let p = scenario.profile();

        let start = raw_wet + p.start_frac * range + gaussian(0.0, range * 0.03);

        Self {
            base: start.clamp(raw_wet, raw_dry),
            raw_dry,
            raw_wet,
            center: (raw_dry + raw_wet) / 2.0,
            drift_per_sample: p.drift * range,
            walk_sigma: p.walk_sigma * range,
            mean_reversion: p.mean_reversion,
            noise_sigma: p.noise_sigma * range,
            spike_prob: p.spike_prob,
            spike_sigma: p.spike_sigma * range,
            pump_works: p.pump_works,
            // A 15 s watering moves the soil about a third of the range.
            wet_per_sec: range * 0.022,
            diurnal_period_s,
        }
    }

    /// Advance the soil model one step and read the probe.
    pub(crate) fn sample_moisture(&mut self) -> u16 {
        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);

        self.base = (self.base + self.drift_per_sample + pull + walk)
            .clamp(self.raw_wet - 20.0, self.raw_dry + 20.0);

        self.read_moisture()
    }

    /// Read the probe without advancing the soil model.
    pub(crate) fn read_moisture(&self) -> u16 {
        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };
        to_adc(self.base + noise + spike)
    }

    /// Light sensor reading at `now_s` seconds. Bright noon reads low,
    /// night reads near full scale.
    pub(crate) fn read_light(&self, now_s: f64) -> u16 {
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        let daylight = (0.9 * phase.sin()).max(0.0) + 0.05;
        let raw = f64::from(ADC_MAX) * (1.0 - daylight) + gaussian(0.0, 4.0);
        to_adc(raw)
    }

    /// Run the pump for `duration_ms`.
    pub(crate) fn run_pump(&mut self, duration_ms: u32) {
        if !self.pump_works {
            return;
        }
        let secs = f64::from(duration_ms) / 1000.0;
        self.base = (self.base - self.wet_per_sec * secs).max(self.raw_wet - 20.0);
    }

    /// Drop per-reading noise so tests can reason about exact deltas.
    #[cfg(test)]
    pub(crate) fn noiseless(mut self) -> Self {
        self.noise_sigma = 0.0;
        self.spike_prob = 0.0;
        self
    }
}

fn to_adc(v: f64) -> u16 {
    v.round().clamp(0.0, f64::from(ADC_MAX)) as u16
}

// ===========================================================================
// Tests
// ===========================================================================
