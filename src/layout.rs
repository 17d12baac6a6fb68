//! Addressing table: logical `(x, y)` to position on the LED data line.
//!
//! The wall is built from strip panels stacked in bands of `band_height`
//! rows. Within a band the strip runs column by column, starting at the
//! physical left edge, which is the logical right edge (`x = width - 1`).
//! Columns alternate direction, so the strip snakes up one column and down
//! the next:
//!
//! ```text
//! band 0, width 4, band height 3 (logical view, numbers = strip index):
//!
//!   x:  0   1   2   3
//!      11   6   5   0     y = 0
//!      10   7   4   1     y = 1
//!       9   8   3   2     y = 2
//! ```
//!
//! Band `n` starts at `n * width * band_height`.

use crate::error::ConfigError;

/// Default number of rows per strip band.
pub const DEFAULT_BAND_HEIGHT: usize = 8;

/// Position of an LED on the serialized data line.
///
/// Only [`Layout::index`] creates these, so every value is in
/// `0..layout.led_count()`.
///
/// # Rust concept: newtypes
/// The inner `usize` is private. Outside this module a `PhysicalIndex` can be
/// read but not made, so the type itself says "came from the mapping".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalIndex(usize);

impl PhysicalIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

/// Fixed display geometry plus the serpentine-within-band mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    width: usize,
    height: usize,
    band_height: usize,
    panel_width: usize,
}

impl Layout {
    /// Validate a geometry.
    ///
    /// `height` must be a whole number of bands and `width` a whole number
    /// of panels, otherwise some strip indices would be unreachable.
    pub fn new(
        width: usize,
        height: usize,
        band_height: usize,
        panel_width: usize,
    ) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 || band_height == 0 || panel_width == 0 {
            return Err(ConfigError::Invalid(format!(
                "display dimensions must be non-zero (width {width}, height {height}, band height {band_height}, panel width {panel_width})"
            )));
        }
        if height % band_height != 0 {
            return Err(ConfigError::Invalid(format!(
                "height {height} is not a multiple of band height {band_height}"
            )));
        }
        if width % panel_width != 0 {
            return Err(ConfigError::Invalid(format!(
                "width {width} is not a multiple of panel width {panel_width}"
            )));
        }
        Ok(Self {
            width,
            height,
            band_height,
            panel_width,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn band_height(&self) -> usize {
        self.band_height
    }

    /// Total LEDs on the data line.
    pub fn led_count(&self) -> usize {
        self.width * self.height
    }

    /// Number of physical panels (panels per band times bands).
    pub fn panel_count(&self) -> usize {
        (self.width / self.panel_width) * (self.height / self.band_height)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    /// Map a logical coordinate to its strip index, or `None` when the
    /// coordinate is off the display.
    pub fn index(&self, x: i32, y: i32) -> Option<PhysicalIndex> {
        if !self.contains(x, y) {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        let b = self.band_height;

        let band = y / b;
        let y_in_band = y % b;
        let x_phys = self.width - 1 - x;
        let y_offset = if x_phys % 2 == 0 {
            y_in_band
        } else {
            b - 1 - y_in_band
        };

        Some(PhysicalIndex(band * self.width * b + x_phys * b + y_offset))
    }

    /// Every valid coordinate, row by row.
    pub fn coordinates(&self) -> impl Iterator<Item = (i32, i32)> + use<> {
        let (width, height) = (self.width as i32, self.height as i32);
        (0..height).flat_map(move |y| (0..width).map(move |x| (x, y)))
    }

    /// Every strip index, reached through the mapping.
    pub fn indices(&self) -> impl Iterator<Item = PhysicalIndex> + '_ {
        self.coordinates().filter_map(|(x, y)| self.index(x, y))
    }
}
