//! WS281x strip on a Raspberry Pi via `rs_ws281x` (PWM/PCM + DMA).
//!
//! Needs root (or `/dev/mem` access) and a DMA channel nothing else uses.

use crate::config::StripConfig;
use crate::error::DriverError;
use crate::layout::PhysicalIndex;
use crate::sink::{DriverFactory, LedDriver};
use rs_ws281x::{ChannelBuilder, Controller, ControllerBuilder, StripType, WS2811Error};
use std::thread;
use std::time::Duration;

/// How long to give the kernel to free a DMA channel before retrying.
const RELEASE_SETTLE: Duration = Duration::from_millis(500);

pub struct Ws281xDriver {
    controller: Controller,
    channel: usize,
}

// SAFETY: the controller's raw pointers refer to memory owned by the C
// library for this handle alone. The handle lives inside the single
// `Display`, which is moved between threads but never shared.
unsafe impl Send for Ws281xDriver {}

impl LedDriver for Ws281xDriver {
    fn set_pixel_rgb(&mut self, index: PhysicalIndex, r: u8, g: u8, b: u8) {
        if let Some(led) = self.controller.leds_mut(self.channel).get_mut(index.get()) {
            *led = [b, g, r, 0];
        }
    }

    fn show(&mut self) -> Result<(), DriverError> {
        self.controller
            .render()
            .map_err(|e| DriverError::Render(format!("{e:?}")))?;
        self.controller
            .wait()
            .map_err(|e| DriverError::Render(format!("{e:?}")))
    }

    fn set_brightness(&mut self, level: u8) {
        self.controller.set_brightness(self.channel, level);
    }

    fn cleanup(&mut self) {
        // ws2811_fini runs when the controller is dropped right after this.
        tracing::debug!("Releasing ws281x channel {}", self.channel);
    }
}

pub struct Ws281xFactory {
    strip: StripConfig,
}

impl Ws281xFactory {
    pub fn new(strip: StripConfig) -> Self {
        Self { strip }
    }
}

impl DriverFactory for Ws281xFactory {
    fn acquire(&mut self, led_count: usize) -> Result<Box<dyn LedDriver>, DriverError> {
        let strip = &self.strip;
        tracing::info!(
            "Opening ws281x: pin {}, {} Hz, DMA {}, channel {}, invert {}",
            strip.data_pin,
            strip.frequency,
            strip.dma_channel,
            strip.channel,
            strip.invert
        );

        let channel = ChannelBuilder::new()
            .pin(strip.data_pin)
            .count(led_count as i32)
            .strip_type(StripType::Ws2811Grb)
            .invert(strip.invert)
            .brightness(u8::MAX)
            .build();

        let controller = ControllerBuilder::new()
            .freq(strip.frequency)
            .dma(strip.dma_channel)
            .channel(strip.channel, channel)
            .build()
            .map_err(driver_error)?;

        Ok(Box::new(Ws281xDriver {
            controller,
            channel: strip.channel,
        }))
    }

    /// Settle-wait, not an active release.
    ///
    /// A failed `ws2811_init` frees its own partial state, and this factory
    /// holds no handle between attempts, so there is nothing of ours to drop.
    /// What usually holds the DMA channel or `/dev/mem` mapping is a previous
    /// process whose teardown is still in flight, so the retry waits for it.
    fn release(&mut self) {
        tracing::warn!("Waiting {:?} for the LED device to be released", RELEASE_SETTLE);
        thread::sleep(RELEASE_SETTLE);
    }
}

/// Resource contention (DMA, memory mapping) may clear on retry; anything
/// else means the device cannot be driven at all.
fn driver_error(e: WS2811Error) -> DriverError {
    match e {
        WS2811Error::Dma | WS2811Error::Mmap | WS2811Error::MemLock => {
            DriverError::Busy(format!("{e:?}"))
        }
        _ => DriverError::Unavailable(format!("{e:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(WS2811Error::Dma)]
    #[case(WS2811Error::Mmap)]
    #[case(WS2811Error::MemLock)]
    fn contention_is_busy(#[case] e: WS2811Error) {
        assert!(matches!(driver_error(e), DriverError::Busy(_)));
    }

    #[rstest]
    #[case(WS2811Error::HwNotSupported)]
    #[case(WS2811Error::IllegalGpio)]
    #[case(WS2811Error::GpioInit)]
    fn unusable_device_is_unavailable(#[case] e: WS2811Error) {
        assert!(matches!(driver_error(e), DriverError::Unavailable(_)));
    }
}
