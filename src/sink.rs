//! Device sink: owns the LED strip handle and pushes colors onto it.
//!
//! Two traits mark the hardware boundary. [`DriverFactory`] acquires a strip
//! handle (and can release a stale one), [`LedDriver`] is the handle itself.
//! The `ws281x` module implements both for a Raspberry Pi; [`MemoryDriver`]
//! keeps everything in memory so the rest of the crate can be exercised
//! without hardware.

use crate::Color;
use crate::error::{DriverError, HardwareError, SinkError};
use crate::layout::{Layout, PhysicalIndex};
use std::sync::{Arc, Mutex, PoisonError};

/// An acquired LED strip.
///
/// Rust concept: TRAIT OBJECTS
/// `Box<dyn LedDriver>` picks the implementation at runtime (ws281x on the
/// Pi, [`MemoryDriver`] in tests). The `Send` supertrait lets the box travel
/// into the pattern thread.
pub trait LedDriver: Send {
    /// Write one LED into the driver's buffer. Nothing is emitted yet.
    fn set_pixel_rgb(&mut self, index: PhysicalIndex, r: u8, g: u8, b: u8);

    /// Emit the whole buffer over the data line.
    fn show(&mut self) -> Result<(), DriverError>;

    /// Hardware brightness applied on every later `show` (0-255).
    fn set_brightness(&mut self, level: u8);

    /// Release the device. Called once, right before the driver is dropped.
    fn cleanup(&mut self);
}

/// Opens (and if needed force-releases) the strip device.
pub trait DriverFactory {
    fn acquire(&mut self, led_count: usize) -> Result<Box<dyn LedDriver>, DriverError>;

    /// Release whatever still holds the device so `acquire` can be retried.
    fn release(&mut self);
}

// ── DeviceSink ─────────────────────────────────────────────────────

pub struct DeviceSink {
    driver: Option<Box<dyn LedDriver>>,
    layout: Layout,
    brightness: f32,
}

impl DeviceSink {
    /// Acquire the strip. A failed acquisition is retried exactly once after
    /// asking the factory to release the device; the second failure is fatal.
    pub fn open(factory: &mut dyn DriverFactory, layout: Layout) -> Result<Self, HardwareError> {
        let count = layout.led_count();
        let driver = match factory.acquire(count) {
            Ok(driver) => driver,
            Err(first) => {
                tracing::warn!("LED strip acquisition failed ({}), releasing and retrying", first);
                factory.release();
                factory
                    .acquire(count)
                    .map_err(|source| HardwareError::Acquisition {
                        attempts: 2,
                        source,
                    })?
            }
        };

        tracing::info!(
            "LED strip acquired: {} LEDs, {}x{} across {} panels",
            count,
            layout.width(),
            layout.height(),
            layout.panel_count()
        );
        Ok(Self::new(driver, layout))
    }

    /// Wrap an already acquired driver at full brightness.
    pub fn new(mut driver: Box<dyn LedDriver>, layout: Layout) -> Self {
        driver.set_brightness(u8::MAX);
        Self {
            driver: Some(driver),
            layout,
            brightness: 1.0,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn is_released(&self) -> bool {
        self.driver.is_none()
    }

    /// Write one logical pixel into the strip buffer. Off-display
    /// coordinates and writes after `shutdown` are dropped.
    pub fn push(&mut self, x: i32, y: i32, color: Color) {
        let (Some(index), Some(driver)) = (self.layout.index(x, y), self.driver.as_mut()) else {
            return;
        };
        driver.set_pixel_rgb(index, color.r, color.g, color.b);
    }

    /// Emit the strip buffer. `&mut self` keeps two flushes on one strip
    /// from ever overlapping.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        let driver = self.driver.as_mut().ok_or(SinkError::Released)?;
        driver.show()?;
        Ok(())
    }

    /// Set brightness for subsequent frames, clamped to `[0.0, 1.0]`.
    pub fn set_global_brightness(&mut self, level: f32) {
        let level = if level.is_nan() {
            0.0
        } else {
            level.clamp(0.0, 1.0)
        };
        self.brightness = level;
        if let Some(driver) = self.driver.as_mut() {
            driver.set_brightness((level * 255.0).round() as u8);
        }
    }

    /// Blank the strip, flush once and release the handle. Safe to call again.
    pub fn shutdown(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        for index in self.layout.indices() {
            driver.set_pixel_rgb(index, 0, 0, 0);
        }
        if let Err(e) = driver.show() {
            tracing::warn!("Failed to flush blank frame during shutdown: {}", e);
        }
        driver.cleanup();
        tracing::info!("LED strip released");
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── In-memory strip ────────────────────────────────────────────────

/// What a [`MemoryDriver`] has been told to do so far.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryStrip {
    /// The driver-side buffer, indexed by strip position.
    pub pixels: Vec<Color>,
    /// The last emitted frame, with hardware brightness applied.
    pub emitted: Vec<Color>,
    pub shows: usize,
    pub brightness: u8,
    pub cleanups: usize,
}

/// A strip that lives in memory. Clones share the same strip, so a caller can
/// hand one clone to a [`DeviceSink`] and inspect it through another.
#[derive(Clone, Debug)]
pub struct MemoryDriver {
    strip: Arc<Mutex<MemoryStrip>>,
}

impl MemoryDriver {
    pub fn new(led_count: usize) -> Self {
        let strip = MemoryStrip {
            pixels: vec![Color::BLACK; led_count],
            emitted: vec![Color::BLACK; led_count],
            shows: 0,
            brightness: u8::MAX,
            cleanups: 0,
        };
        Self {
            strip: Arc::new(Mutex::new(strip)),
        }
    }

    pub fn snapshot(&self) -> MemoryStrip {
        self.strip
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LedDriver for MemoryDriver {
    fn set_pixel_rgb(&mut self, index: PhysicalIndex, r: u8, g: u8, b: u8) {
        let mut strip = self.strip.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pixel) = strip.pixels.get_mut(index.get()) {
            *pixel = Color::new(r, g, b);
        }
    }

    fn show(&mut self) -> Result<(), DriverError> {
        let mut strip = self.strip.lock().unwrap_or_else(PoisonError::into_inner);
        let factor = strip.brightness as f32 / 255.0;
        strip.emitted = strip.pixels.iter().map(|c| c.scale(factor)).collect();
        strip.shows += 1;
        Ok(())
    }

    fn set_brightness(&mut self, level: u8) {
        self.strip
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .brightness = level;
    }

    fn cleanup(&mut self) {
        self.strip
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cleanups += 1;
    }
}

/// Hands out clones of one [`MemoryDriver`].
#[derive(Clone, Debug)]
pub struct MemoryFactory {
    driver: MemoryDriver,
}

impl MemoryFactory {
    pub fn new(driver: MemoryDriver) -> Self {
        Self { driver }
    }
}

impl DriverFactory for MemoryFactory {
    fn acquire(&mut self, _led_count: usize) -> Result<Box<dyn LedDriver>, DriverError> {
        Ok(Box::new(self.driver.clone()))
    }

    fn release(&mut self) {}
}
