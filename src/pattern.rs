//! Patterns and how the next one is chosen.
//!
//! A pattern is anything that, given the [`Display`] and a [`StopFlag`],
//! draws frames until the flag is set. Patterns must check the flag at least
//! once per frame; there is no forced preemption.
//!
//! Built-in patterns form a closed set ([`PatternId`]) registered in a
//! [`Catalog`] of factory functions, so config and CLI names resolve without
//! any runtime lookup by method name.

use crate::Color;
use crate::error::SinkError;
use crate::frame::Display;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Frame pacing for the built-in patterns (~60 fps).
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

// ── Stop flag ──────────────────────────────────────────────────────

/// Cooperative stop signal for one pattern run.
///
/// Each launch gets a fresh flag. Only the controller can set it; the
/// pattern can only read it.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

// ── Pattern ────────────────────────────────────────────────────────

pub trait Pattern: Send {
    fn name(&self) -> &str;

    /// Draw until `stop` is set (or the pattern is done). Called on the
    /// pattern's own thread with exclusive access to the display.
    fn run(&mut self, display: &mut Display, stop: &StopFlag) -> Result<(), SinkError>;
}

/// Built-in patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PatternId {
    Rainbow,
    Pulse,
    Sparkle,
    Wipe,
    Solid,
}

impl PatternId {
    pub const ALL: [PatternId; 5] = [
        PatternId::Rainbow,
        PatternId::Pulse,
        PatternId::Sparkle,
        PatternId::Wipe,
        PatternId::Solid,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PatternId::Rainbow => "rainbow",
            PatternId::Pulse => "pulse",
            PatternId::Sparkle => "sparkle",
            PatternId::Wipe => "wipe",
            PatternId::Solid => "solid",
        }
    }

    fn factory(self) -> PatternFactory {
        match self {
            PatternId::Rainbow => || -> Box<dyn Pattern> { Box::new(Rainbow) },
            PatternId::Pulse => || -> Box<dyn Pattern> { Box::new(Pulse) },
            PatternId::Sparkle => || -> Box<dyn Pattern> { Box::new(Sparkle) },
            PatternId::Wipe => || -> Box<dyn Pattern> { Box::new(Wipe) },
            PatternId::Solid => || -> Box<dyn Pattern> { Box::new(Solid(Color::WHITE)) },
        }
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// # Rust concept: function pointers
/// Non-capturing closures coerce to plain `fn` pointers, so the catalog is a
/// table of `Copy` values with no boxing and no lookup by name.
pub type PatternFactory = fn() -> Box<dyn Pattern>;

/// Ordered registry of pattern factories.
#[derive(Clone, Debug)]
pub struct Catalog {
    entries: Vec<(PatternId, PatternFactory)>,
}

impl Catalog {
    /// All built-in patterns, in [`PatternId::ALL`] order.
    pub fn builtin() -> Self {
        Self::with(&PatternId::ALL)
    }

    pub fn with(ids: &[PatternId]) -> Self {
        let mut entries: Vec<(PatternId, PatternFactory)> = Vec::with_capacity(ids.len());
        for &id in ids {
            if !entries.iter().any(|(existing, _)| *existing == id) {
                entries.push((id, id.factory()));
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = PatternId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn contains(&self, id: PatternId) -> bool {
        self.ids().any(|candidate| candidate == id)
    }

    pub fn create(&self, id: PatternId) -> Option<Box<dyn Pattern>> {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, factory)| factory())
    }
}

// ── Selection policies ─────────────────────────────────────────────

/// Chooses the pattern to launch after the current one stops.
/// `None` means launch nothing and leave the display idle.
pub trait Selector {
    fn select(&mut self) -> Option<Box<dyn Pattern>>;
}

impl<F> Selector for F
where
    F: FnMut() -> Option<Box<dyn Pattern>>,
{
    fn select(&mut self) -> Option<Box<dyn Pattern>> {
        self()
    }
}

/// Never selects anything.
pub struct Blank;

impl Selector for Blank {
    fn select(&mut self) -> Option<Box<dyn Pattern>> {
        None
    }
}

/// Steps through the catalog in order, wrapping around.
pub struct CycleSelector {
    catalog: Catalog,
    next: usize,
}

impl CycleSelector {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog, next: 0 }
    }

    /// Continue the cycle after `id` (so `id` itself comes last).
    pub fn after(catalog: Catalog, id: PatternId) -> Self {
        let next = catalog
            .ids()
            .position(|candidate| candidate == id)
            .map_or(0, |i| i + 1);
        Self { catalog, next }
    }

    pub fn next_id(&mut self) -> Option<PatternId> {
        if self.catalog.is_empty() {
            return None;
        }
        let id = self.catalog.ids().nth(self.next % self.catalog.len())?;
        self.next = (self.next + 1) % self.catalog.len();
        Some(id)
    }
}

impl Selector for CycleSelector {
    fn select(&mut self) -> Option<Box<dyn Pattern>> {
        let id = self.next_id()?;
        self.catalog.create(id)
    }
}

/// Uniform random choice, never picking the same pattern twice in a row
/// when there is anything else to pick.
pub struct RandomSelector {
    catalog: Catalog,
    last: Option<PatternId>,
    rng: StdRng,
}

impl RandomSelector {
    pub fn new(catalog: Catalog) -> Self {
        Self::with_rng(catalog, StdRng::from_entropy())
    }

    pub fn seeded(catalog: Catalog, seed: u64) -> Self {
        Self::with_rng(catalog, StdRng::seed_from_u64(seed))
    }

    fn with_rng(catalog: Catalog, rng: StdRng) -> Self {
        Self {
            catalog,
            last: None,
            rng,
        }
    }

    pub fn next_id(&mut self) -> Option<PatternId> {
        let candidates: Vec<PatternId> = self
            .catalog
            .ids()
            .filter(|&id| self.catalog.len() == 1 || Some(id) != self.last)
            .collect();
        let id = *candidates.choose(&mut self.rng)?;
        self.last = Some(id);
        Some(id)
    }
}

impl Selector for RandomSelector {
    fn select(&mut self) -> Option<Box<dyn Pattern>> {
        let id = self.next_id()?;
        self.catalog.create(id)
    }
}

// ── Built-in patterns ──────────────────────────────────────────────

/// Diagonal rainbow drifting across the wall.
struct Rainbow;

impl Pattern for Rainbow {
    fn name(&self) -> &str {
        PatternId::Rainbow.name()
    }

    fn run(&mut self, display: &mut Display, stop: &StopFlag) -> Result<(), SinkError> {
        let width = display.frame().width().max(1) as u32;
        let mut offset: u32 = 0;

        while !stop.is_set() {
            let frame = display.frame_mut();
            for y in 0..frame.height() as i32 {
                for x in 0..frame.width() as i32 {
                    let hue = (x as u32 * 360 / width + y as u32 * 4 + offset) % 360;
                    frame.set(x, y, Color::from_hue(hue as u16));
                }
            }
            display.show()?;
            offset = (offset + 3) % 360;
            thread::sleep(FRAME_INTERVAL);
        }
        Ok(())
    }
}

/// Whole wall cycling through the hues while pulsing brightness.
struct Pulse;

impl Pattern for Pulse {
    fn name(&self) -> &str {
        PatternId::Pulse.name()
    }

    fn run(&mut self, display: &mut Display, stop: &StopFlag) -> Result<(), SinkError> {
        let mut frame: u32 = 0;

        while !stop.is_set() {
            let hue = ((frame / 2) % 360) as u16;

            // Triangle wave: 0 → 1 → 0 over 200 frames
            let cycle = (frame % 200) as f32;
            let level = if cycle < 100.0 {
                cycle / 100.0
            } else {
                (200.0 - cycle) / 100.0
            };

            display.frame_mut().fill(Color::from_hue(hue).scale(level));
            display.show()?;
            frame = frame.wrapping_add(1);
            thread::sleep(FRAME_INTERVAL);
        }
        Ok(())
    }
}

/// Random pixels flash and fade out.
struct Sparkle;

impl Pattern for Sparkle {
    fn name(&self) -> &str {
        PatternId::Sparkle.name()
    }

    fn run(&mut self, display: &mut Display, stop: &StopFlag) -> Result<(), SinkError> {
        let mut rng = rand::thread_rng();
        let (width, height) = (display.frame().width() as i32, display.frame().height() as i32);
        let per_frame = ((width * height) / 64).max(1);

        while !stop.is_set() {
            let frame = display.frame_mut();
            for (x, y, color) in frame.pixels().collect::<Vec<_>>() {
                frame.set(x, y, color.fade(12));
            }
            for _ in 0..per_frame {
                let x = rng.gen_range(0..width);
                let y = rng.gen_range(0..height);
                let color = frame.get(x, y).saturating_add(Color::from_hue(rng.gen_range(0..360)));
                frame.set(x, y, color);
            }
            display.show()?;
            thread::sleep(FRAME_INTERVAL);
        }
        Ok(())
    }
}

/// Column-by-column colour wipe, right to left, a new hue each pass.
struct Wipe;

impl Pattern for Wipe {
    fn name(&self) -> &str {
        PatternId::Wipe.name()
    }

    fn run(&mut self, display: &mut Display, stop: &StopFlag) -> Result<(), SinkError> {
        let (width, height) = (display.frame().width() as i32, display.frame().height() as i32);
        let mut hue: u16 = 0;
        let mut column = width - 1;

        while !stop.is_set() {
            let color = Color::from_hue(hue);
            for y in 0..height {
                display.frame_mut().set(column, y, color);
            }
            display.show()?;

            column -= 1;
            if column < 0 {
                column = width - 1;
                hue = (hue + 47) % 360;
            }
            thread::sleep(FRAME_INTERVAL * 2);
        }
        Ok(())
    }
}

/// A single static colour.
struct Solid(Color);

impl Pattern for Solid {
    fn name(&self) -> &str {
        PatternId::Solid.name()
    }

    fn run(&mut self, display: &mut Display, stop: &StopFlag) -> Result<(), SinkError> {
        display.frame_mut().fill(self.0);
        display.show()?;
        while !stop.is_set() {
            thread::sleep(FRAME_INTERVAL);
        }
        Ok(())
    }
}
