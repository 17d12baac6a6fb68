//! Button input on Raspberry Pi GPIO via `rppal`.

use crate::error::InputError;
use crate::input::{DigitalInput, Pull};
use rppal::gpio::{Gpio, InputPin};
use std::collections::HashMap;

#[derive(Default)]
pub struct RppalInput {
    gpio: Option<Gpio>,
    pins: HashMap<u8, InputPin>,
}

impl RppalInput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DigitalInput for RppalInput {
    fn configure_pin(&mut self, pin: u8, pull: Pull) -> Result<(), InputError> {
        let configure_error = |e: rppal::gpio::Error| InputError::Configure {
            pin,
            reason: e.to_string(),
        };

        let gpio = match self.gpio.as_ref() {
            Some(gpio) => gpio,
            None => self.gpio.insert(Gpio::new().map_err(configure_error)?),
        };
        let raw = gpio.get(pin).map_err(configure_error)?;
        let input = match pull {
            Pull::Up => raw.into_input_pullup(),
            Pull::Down => raw.into_input_pulldown(),
        };
        self.pins.insert(pin, input);
        Ok(())
    }

    fn read_level(&mut self, pin: u8) -> Result<bool, InputError> {
        self.pins
            .get(&pin)
            .map(InputPin::is_high)
            .ok_or_else(|| InputError::Read {
                pin,
                reason: "pin not configured".to_string(),
            })
    }
}
