//! Credential-reset trigger. The `gpio` feature reads a push button through
//! rppal; without it, the trigger is the presence of a flag file, which is
//! removed once the trigger fires.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::clock::interval_elapsed;
use crate::config::ResetConfig;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin};

/// A raw, undebounced reset input.
pub(crate) trait ResetInput {
    fn is_active(&mut self) -> bool;

    /// Called once when the trigger fires.
    fn clear(&mut self) {}
}

// ---------------------------------------------------------------------------
// Push button (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct Button {
    pin: InputPin,
}

#[cfg(feature = "gpio")]
impl Button {
    pub(crate) fn new(pin_num: u8) -> Result<Self> {
        let gpio = Gpio::new()?;
        // Button pulls the line high when pressed.
        let pin = gpio.get(pin_num)?.into_input_pulldown();
        Ok(Self { pin })
    }
}

#[cfg(feature = "gpio")]
impl ResetInput for Button {
    fn is_active(&mut self) -> bool {
        self.pin.is_high()
    }
}

// ---------------------------------------------------------------------------
// Flag file (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg_attr(all(feature = "gpio", not(test)), allow(dead_code))]
pub(crate) struct FlagFile {
    path: std::path::PathBuf,
}

#[cfg_attr(all(feature = "gpio", not(test)), allow(dead_code))]
impl FlagFile {
    pub(crate) fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResetInput for FlagFile {
    fn is_active(&mut self) -> bool {
        self.path.exists()
    }

    fn clear(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove reset flag");
        }
    }
}

// ---------------------------------------------------------------------------
// Debounce
// ---------------------------------------------------------------------------

/// Fires once the input has stayed active for `debounce_ms`. Sampled once
/// per loop iteration, so the debounce never blocks the loop.
pub(crate) struct ResetTrigger {
    input: Box<dyn ResetInput>,
    debounce_ms: u32,
    active_since: Option<u32>,
}

impl ResetTrigger {
    pub(crate) fn new(input: Box<dyn ResetInput>, debounce_ms: u32) -> Self {
        Self {
            input,
            debounce_ms,
            active_since: None,
        }
    }

    pub(crate) fn poll(&mut self, now: u32) -> bool {
        if !self.input.is_active() {
            if self.active_since.take().is_some() {
                debug!("reset input released before debounce");
            }
            return false;
        }

        let since = *self.active_since.get_or_insert(now);
        if !interval_elapsed(now, since, self.debounce_ms) {
            return false;
        }

        self.active_since = None;
        self.input.clear();
        info!(held_ms = now.wrapping_sub(since), "reset trigger fired");
        true
    }
}

#[cfg(feature = "gpio")]
pub(crate) fn open(cfg: &ResetConfig) -> Result<ResetTrigger> {
    use anyhow::Context;

    let pin = u8::try_from(cfg.gpio_pin)
        .with_context(|| format!("reset.gpio_pin {} out of range", cfg.gpio_pin))?;
    let button = Button::new(pin).with_context(|| format!("failed to claim gpio {pin}"))?;
    info!(gpio = pin, debounce_ms = cfg.debounce_ms, "reset button armed");
    Ok(ResetTrigger::new(Box::new(button), cfg.debounce_ms))
}

#[cfg(not(feature = "gpio"))]
pub(crate) fn open(cfg: &ResetConfig) -> Result<ResetTrigger> {
    info!(
        path = %cfg.trigger_file,
        debounce_ms = cfg.debounce_ms,
        "reset flag file armed (no gpio)"
    );
    Ok(ResetTrigger::new(
        Box::new(FlagFile::new(&cfg.trigger_file)),
        cfg.debounce_ms,
    ))
}

// ===========================================================================
// Tests
// ===========================================================================
