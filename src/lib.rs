//! Core of a button-driven LED wall.
//!
//! The wall is a rectangle of WS281x strip panels wired as one serpentine
//! data line. This crate provides:
//! - the addressing table from logical `(x, y)` to strip index ([`layout`])
//! - the frame buffer and the device sink that pushes it to the strip
//!   ([`frame`], [`sink`])
//! - a debounced button poller ([`input`])
//! - the lifecycle controller that keeps exactly one pattern drawing at a
//!   time ([`controller`], [`pattern`])
//!
//! Raspberry Pi back ends live behind the `hardware` feature.

pub mod app;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
#[cfg(feature = "hardware")]
pub mod gpio;
pub mod input;
pub mod layout;
pub mod pattern;
pub mod sink;
#[cfg(feature = "hardware")]
pub mod ws281x;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ── Color ──────────────────────────────────────────────────────────

/// 8-bit RGB color, no alpha.
///
/// Arithmetic that could overflow a channel saturates instead of wrapping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Self = Self::new(0, 0, 0);
    pub const WHITE: Self = Self::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Create a color from a hue value (0-360), with full saturation and brightness.
    ///
    /// # Rust concept: match expressions
    /// `match` is exhaustive, so the final `_` arm is the compiler's proof that
    /// every sector of the hue wheel yields a color.
    pub fn from_hue(hue: u16) -> Self {
        let hue = hue % 360;
        let sector = hue / 60;
        let fraction = ((hue % 60) as f32) / 60.0;
        let rising = (fraction * 255.0) as u8;
        let falling = ((1.0 - fraction) * 255.0) as u8;

        match sector {
            0 => Self::new(255, rising, 0),
            1 => Self::new(falling, 255, 0),
            2 => Self::new(0, 255, rising),
            3 => Self::new(0, falling, 255),
            4 => Self::new(rising, 0, 255),
            _ => Self::new(255, 0, falling),
        }
    }

    /// Scale every channel by `factor`, clamped to `[0.0, 1.0]`.
    pub fn scale(self, factor: f32) -> Self {
        let factor = if factor.is_nan() {
            0.0
        } else {
            factor.clamp(0.0, 1.0)
        };
        let channel = |c: u8| (c as f32 * factor).round() as u8;
        Self::new(channel(self.r), channel(self.g), channel(self.b))
    }

    /// Channel-wise sum, saturating at 255.
    pub fn saturating_add(self, other: Self) -> Self {
        Self::new(
            self.r.saturating_add(other.r),
            self.g.saturating_add(other.g),
            self.b.saturating_add(other.b),
        )
    }

    /// Subtract `amount` from every channel, stopping at 0.
    pub fn fade(self, amount: u8) -> Self {
        Self::new(
            self.r.saturating_sub(amount),
            self.g.saturating_sub(amount),
            self.b.saturating_sub(amount),
        )
    }
}

// ── Shutdown signal ────────────────────────────────────────────────

/// Set up a Ctrl+C / SIGTERM handler that clears the returned `running` flag.
///
/// # Rust concept: Arc and AtomicBool
/// The flag is shared between the signal handler and the main loop. `Arc`
/// gives both of them ownership; `AtomicBool` needs no mutex for one bool.
pub fn setup_signal_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    Ok(running)
}

/// Check if the main loop should keep running.
pub fn is_running(running: &AtomicBool) -> bool {
    running.load(Ordering::SeqCst)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0, 255, 0, 0)] // Red
    #[case(60, 255, 255, 0)] // Yellow
    #[case(120, 0, 255, 0)] // Green
    #[case(180, 0, 255, 255)] // Cyan
    #[case(240, 0, 0, 255)] // Blue
    #[case(300, 255, 0, 255)] // Magenta
    fn color_from_hue_primary(#[case] hue: u16, #[case] r: u8, #[case] g: u8, #[case] b: u8) {
        assert_eq!(Color::from_hue(hue), Color::new(r, g, b));
    }

    #[test]
    fn color_from_hue_wraps_at_360() {
        assert_eq!(Color::from_hue(0), Color::from_hue(360));
        assert_eq!(Color::from_hue(90), Color::from_hue(450));
    }

    #[rstest]
    #[case(1.0, Color::new(200, 100, 50))]
    #[case(1.5, Color::new(200, 100, 50))]
    #[case(0.5, Color::new(100, 50, 25))]
    #[case(0.0, Color::BLACK)]
    #[case(-0.2, Color::BLACK)]
    #[case(f32::NAN, Color::BLACK)]
    fn scale_clamps_factor(#[case] factor: f32, #[case] expected: Color) {
        assert_eq!(Color::new(200, 100, 50).scale(factor), expected);
    }

    #[test]
    fn saturating_add_clamps_instead_of_wrapping() {
        let sum = Color::new(200, 10, 255).saturating_add(Color::new(100, 10, 1));
        assert_eq!(sum, Color::new(255, 20, 255));
    }

    #[test]
    fn fade_stops_at_zero() {
        assert_eq!(Color::new(10, 40, 0).fade(20), Color::new(0, 20, 0));
    }

    #[test]
    fn is_running_reads_flag() {
        let flag = AtomicBool::new(true);
        assert!(is_running(&flag));
        flag.store(false, Ordering::SeqCst);
        assert!(!is_running(&flag));
    }
}
