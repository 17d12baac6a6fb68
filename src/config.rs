//! Configuration: display geometry, strip wiring, buttons and timings.
//!
//! Loaded from a TOML file; every field has a default, so an empty file is a
//! valid 32x40 wall with three buttons.
//!
//! ```toml
//! [display]
//! width = 32
//! height = 40
//! brightness = 0.4
//!
//! [controller]
//! start_pattern = "rainbow"
//!
//! [[buttons]]
//! id = "next"
//! pin = 17
//! action = "next"
//! ```

use crate::controller::DEFAULT_STOP_TIMEOUT;
use crate::error::ConfigError;
use crate::input::{Button, ButtonId, Pull};
use crate::layout::{DEFAULT_BAND_HEIGHT, Layout};
use crate::pattern::PatternId;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub display: DisplayConfig,
    pub strip: StripConfig,
    pub input: InputConfig,
    pub controller: ControllerConfig,
    pub buttons: Vec<ButtonConfig>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub width: usize,
    pub height: usize,
    pub band_height: usize,
    pub panel_width: usize,
    /// Optional cross-check; must equal `width * height` when given.
    pub total_leds: Option<usize>,
    /// Default global brightness, 0.0-1.0.
    pub brightness: f32,
}

/// WS281x wiring on the Pi.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StripConfig {
    pub data_pin: i32,
    /// Signal frequency in Hz.
    pub frequency: u32,
    /// DMA channel; must not be used by anything else on the Pi.
    pub dma_channel: i32,
    pub invert: bool,
    pub channel: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    pub stop_timeout_ms: u64,
    /// Pattern launched at startup; none leaves the wall dark until a press.
    pub start_pattern: Option<PatternId>,
    /// Make the `next` action pick at random instead of cycling.
    pub random: bool,
}

/// What a button press does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonAction {
    /// Next pattern per the selection policy.
    Next,
    /// A random pattern.
    Random,
    /// Stop the pattern and blank the wall.
    Off,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ButtonConfig {
    pub id: ButtonId,
    pub pin: u8,
    #[serde(default)]
    pub pull: Pull,
    pub action: ButtonAction,
}

impl Default for Config {
    fn default() -> Self {
        let button = |id: &str, pin, action| ButtonConfig {
            id: id.into(),
            pin,
            pull: Pull::Up,
            action,
        };
        Self {
            display: DisplayConfig::default(),
            strip: StripConfig::default(),
            input: InputConfig::default(),
            controller: ControllerConfig::default(),
            buttons: vec![
                button("next", 17, ButtonAction::Next),
                button("random", 27, ButtonAction::Random),
                button("off", 22, ButtonAction::Off),
            ],
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 32,
            height: 40,
            band_height: DEFAULT_BAND_HEIGHT,
            panel_width: 32,
            total_leds: None,
            brightness: 0.5,
        }
    }
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            data_pin: 18,
            frequency: 800_000,
            dma_channel: 10,
            invert: false,
            channel: 0,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            poll_interval_ms: 10,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT.as_millis() as u64,
            start_pattern: None,
            random: false,
        }
    }
}

impl Config {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&contents)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let layout = self.layout()?;

        if let Some(total) = self.display.total_leds {
            if total != layout.led_count() {
                return Err(ConfigError::Invalid(format!(
                    "total_leds is {total} but a {}x{} wall has {} LEDs",
                    layout.width(),
                    layout.height(),
                    layout.led_count()
                )));
            }
        }
        if !self.display.brightness.is_finite() {
            return Err(ConfigError::Invalid("brightness must be a number".into()));
        }
        if self.input.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be non-zero".into()));
        }
        if self.controller.stop_timeout_ms == 0 {
            return Err(ConfigError::Invalid("stop_timeout_ms must be non-zero".into()));
        }

        let mut ids = HashSet::new();
        let mut pins = HashSet::new();
        for button in &self.buttons {
            if !ids.insert(&button.id) {
                return Err(ConfigError::Invalid(format!("duplicate button id '{}'", button.id)));
            }
            if !pins.insert(button.pin) {
                return Err(ConfigError::Invalid(format!(
                    "pin {} used by more than one button",
                    button.pin
                )));
            }
        }
        Ok(())
    }

    pub fn layout(&self) -> Result<Layout, ConfigError> {
        let d = &self.display;
        Layout::new(d.width, d.height, d.band_height, d.panel_width)
    }

    pub fn buttons(&self) -> Vec<Button> {
        self.buttons
            .iter()
            .map(|b| Button {
                id: b.id.clone(),
                pin: b.pin,
                pull: b.pull,
            })
            .collect()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.input.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.input.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.controller.stop_timeout_ms)
    }
}
