//! Debounced button input.
//!
//! One dedicated thread samples every button once per tick (no interrupts),
//! runs each sample through a [`Debouncer`] and calls the registered handler
//! on accepted press edges. Release edges only update state.
//!
//! ```text
//!   Released --press, > debounce since last accepted--> Pressed  (fires)
//!   Released --press, within debounce window---------> Pressed  (silent)
//!   Pressed  --release-------------------------------> Released (silent)
//! ```

use crate::error::InputError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Logical button name, e.g. `"next"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct ButtonId(String);

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ButtonId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ButtonId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How the button is wired, which decides the internal pull resistor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    /// Button connects the pin to ground; reads low when pressed.
    #[default]
    Up,
    /// Button connects the pin to 3.3V; reads high when pressed.
    Down,
}

impl Pull {
    pub fn is_pressed(self, level: bool) -> bool {
        match self {
            Pull::Up => !level,
            Pull::Down => level,
        }
    }

    /// Pin level while the button is pressed.
    pub fn pressed_level(self) -> bool {
        matches!(self, Pull::Down)
    }
}

/// One physical button to poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Button {
    pub id: ButtonId,
    pub pin: u8,
    pub pull: Pull,
}

/// The digital input hardware boundary.
pub trait DigitalInput: Send {
    fn configure_pin(&mut self, pin: u8, pull: Pull) -> Result<(), InputError>;

    /// `true` for a high level.
    fn read_level(&mut self, pin: u8) -> Result<bool, InputError>;
}

/// Handler called on the poller thread for each accepted press.
pub type Handler = Box<dyn FnMut(&ButtonId) -> anyhow::Result<()> + Send>;

// ── Debounce ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonLevel {
    Released,
    Pressed,
}

/// Press-edge debouncer for one button.
///
/// A press edge is accepted only if more than `interval` has passed since the
/// last accepted one.
///
/// A held button fires once; there is no auto-repeat. An older poll-and-compare
/// debounce only checked the time since the last accepted press, which
/// re-fires once per interval while a button is held (or stuck) low. Events
/// here come from the Released to Pressed edge alone, so a held button needs
/// a release before it can fire again.
///
/// # Rust concept: `Option::is_none_or`
/// "No press accepted yet" is `None` rather than a sentinel `Instant`, and
/// `is_none_or` folds the first-press case and the interval check into one
/// expression.
#[derive(Clone, Debug)]
pub struct Debouncer {
    interval: Duration,
    level: ButtonLevel,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            level: ButtonLevel::Released,
            last_accepted: None,
        }
    }

    pub fn level(&self) -> ButtonLevel {
        self.level
    }

    /// Feed one sample. Returns `true` when a press edge is accepted.
    pub fn update(&mut self, pressed: bool, now: Instant) -> bool {
        match (self.level, pressed) {
            (ButtonLevel::Released, true) => {
                self.level = ButtonLevel::Pressed;
                let accepted = self
                    .last_accepted
                    .is_none_or(|last| now.saturating_duration_since(last) > self.interval);
                if accepted {
                    self.last_accepted = Some(now);
                }
                accepted
            }
            (ButtonLevel::Pressed, false) => {
                self.level = ButtonLevel::Released;
                false
            }
            _ => false,
        }
    }
}

// ── Poller ─────────────────────────────────────────────────────────

struct ButtonState {
    button: Button,
    debouncer: Debouncer,
    read_failing: bool,
}

/// Everything the poll thread owns; handed back on `stop` so the poller can
/// be started again.
struct PollLoop {
    input: Box<dyn DigitalInput>,
    buttons: Vec<ButtonState>,
}

pub struct InputPoller {
    handlers: Arc<Mutex<HashMap<ButtonId, Handler>>>,
    tick: Duration,
    stop: Arc<AtomicBool>,
    idle: Option<PollLoop>,
    worker: Option<JoinHandle<PollLoop>>,
}

impl InputPoller {
    /// Configure every button pin. No polling happens until [`start`](Self::start).
    pub fn new(
        mut input: Box<dyn DigitalInput>,
        buttons: &[Button],
        tick: Duration,
        debounce: Duration,
    ) -> Result<Self, InputError> {
        let mut states = Vec::with_capacity(buttons.len());
        for button in buttons {
            input.configure_pin(button.pin, button.pull)?;
            tracing::info!(
                "Button '{}' on pin {} ({:?} pull)",
                button.id,
                button.pin,
                button.pull
            );
            states.push(ButtonState {
                button: button.clone(),
                debouncer: Debouncer::new(debounce),
                read_failing: false,
            });
        }

        Ok(Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            tick,
            stop: Arc::new(AtomicBool::new(false)),
            idle: Some(PollLoop {
                input,
                buttons: states,
            }),
            worker: None,
        })
    }

    /// Associate `handler` with a button, replacing any previous handler.
    /// Works while the poller is running.
    pub fn register_handler<F>(&self, id: impl Into<ButtonId>, handler: F)
    where
        F: FnMut(&ButtonId) -> anyhow::Result<()> + Send + 'static,
    {
        let id = id.into();
        let replaced = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Box::new(handler))
            .is_some();
        if replaced {
            tracing::debug!("Replaced handler for button '{}'", id);
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawn the poll thread. Does nothing if it is already running.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let Some(state) = self.idle.take() else {
            tracing::error!("Input poller cannot restart: its last poll thread panicked");
            return;
        };

        self.stop.store(false, Ordering::SeqCst);
        let stop = self.stop.clone();
        let handlers = self.handlers.clone();
        let tick = self.tick;
        self.worker = Some(thread::spawn(move || poll_loop(state, stop, handlers, tick)));
        tracing::info!("Input poller started ({:?} tick)", tick);
    }

    /// Stop polling and wait for the poll thread to exit.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        match worker.join() {
            Ok(state) => self.idle = Some(state),
            Err(_) => tracing::error!("Input poll thread panicked"),
        }
        tracing::info!("Input poller stopped");
    }
}

impl Drop for InputPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(
    mut state: PollLoop,
    stop: Arc<AtomicBool>,
    handlers: Arc<Mutex<HashMap<ButtonId, Handler>>>,
    tick: Duration,
) -> PollLoop {
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        for entry in state.buttons.iter_mut() {
            let level = match state.input.read_level(entry.button.pin) {
                Ok(level) => {
                    entry.read_failing = false;
                    level
                }
                Err(e) => {
                    if !entry.read_failing {
                        tracing::warn!("Skipping button '{}': {}", entry.button.id, e);
                        entry.read_failing = true;
                    }
                    continue;
                }
            };

            let pressed = entry.button.pull.is_pressed(level);
            let was = entry.debouncer.level();
            if entry.debouncer.update(pressed, now) {
                tracing::info!("Button '{}' pressed", entry.button.id);
                dispatch(&handlers, &entry.button.id);
            } else if pressed && was == ButtonLevel::Released {
                tracing::debug!("Button '{}' bounce ignored", entry.button.id);
            }
        }
        thread::sleep(tick);
    }
    state
}

/// Run one handler, containing both `Err` returns and panics.
///
/// The handler is taken out of the map for the call, so the map is not
/// locked while it runs and it may register handlers itself. If it replaced
/// its own entry, the replacement wins.
fn dispatch(handlers: &Mutex<HashMap<ButtonId, Handler>>, id: &ButtonId) {
    let lock = || handlers.lock().unwrap_or_else(PoisonError::into_inner);

    let Some(mut handler) = lock().remove(id) else {
        tracing::debug!("No handler registered for button '{}'", id);
        return;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| handler(id))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Handler for button '{}' failed: {:#}", id, e),
        Err(_) => tracing::error!("Handler for button '{}' panicked", id),
    }
    lock().entry(id.clone()).or_insert(handler);
}

// ── Simulated input ────────────────────────────────────────────────

/// Digital input backed by shared memory. Clones share pin levels, so one
/// clone can drive the poller while another presses buttons.
#[derive(Clone, Debug, Default)]
pub struct SimulatedInput {
    pins: Arc<Mutex<HashMap<u8, (Pull, bool)>>>,
}

impl SimulatedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, pin: u8) {
        self.drive(pin, true);
    }

    pub fn release(&self, pin: u8) {
        self.drive(pin, false);
    }

    fn drive(&self, pin: u8, pressed: bool) {
        let mut pins = self.pins.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((pull, level)) = pins.get_mut(&pin) {
            *level = if pressed {
                pull.pressed_level()
            } else {
                !pull.pressed_level()
            };
        }
    }
}

impl DigitalInput for SimulatedInput {
    fn configure_pin(&mut self, pin: u8, pull: Pull) -> Result<(), InputError> {
        self.pins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pin, (pull, !pull.pressed_level()));
        Ok(())
    }

    fn read_level(&mut self, pin: u8) -> Result<bool, InputError> {
        self.pins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pin)
            .map(|&(_, level)| level)
            .ok_or_else(|| InputError::Read {
                pin,
                reason: "pin not configured".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;

    const DEBOUNCE: Duration = Duration::from_millis(50);
    const TICK: Duration = Duration::from_millis(2);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Press at 0ms, release shortly after, press again at `gap`.
    fn presses_fired(gap: u64) -> usize {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(DEBOUNCE);
        let mut fired = 0;
        fired += debouncer.update(true, t0) as usize;
        fired += debouncer.update(false, t0 + ms(gap / 2)) as usize;
        fired += debouncer.update(true, t0 + ms(gap)) as usize;
        fired
    }

    #[rstest]
    #[case(5, 1)]
    #[case(50, 1)]
    #[case(60, 2)]
    fn debounce_window(#[case] gap: u64, #[case] expected: usize) {
        assert_eq!(presses_fired(gap), expected);
    }

    #[test]
    fn release_never_fires() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(DEBOUNCE);
        assert!(debouncer.update(true, t0));
        assert!(!debouncer.update(false, t0 + ms(100)));
        assert_eq!(debouncer.level(), ButtonLevel::Released);
    }

    #[test]
    fn held_button_fires_once() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(DEBOUNCE);
        let fired = (0..50)
            .filter(|i| debouncer.update(true, t0 + ms(i * 10)))
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn bounce_window_counts_from_last_accepted_press() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(DEBOUNCE);
        assert!(debouncer.update(true, t0));
        debouncer.update(false, t0 + ms(20));
        assert!(!debouncer.update(true, t0 + ms(40)));
        debouncer.update(false, t0 + ms(45));
        // 55ms after the accepted press, even though only 15ms after the bounce
        assert!(debouncer.update(true, t0 + ms(55)));
    }

    #[rstest]
    #[case(Pull::Up, false, true)]
    #[case(Pull::Up, true, false)]
    #[case(Pull::Down, true, true)]
    #[case(Pull::Down, false, false)]
    fn pull_decides_pressed_level(#[case] pull: Pull, #[case] level: bool, #[case] pressed: bool) {
        assert_eq!(pull.is_pressed(level), pressed);
    }

    fn poller(input: &SimulatedInput) -> InputPoller {
        let buttons = [
            Button {
                id: "next".into(),
                pin: 17,
                pull: Pull::Up,
            },
            Button {
                id: "off".into(),
                pin: 27,
                pull: Pull::Down,
            },
        ];
        InputPoller::new(Box::new(input.clone()), &buttons, TICK, DEBOUNCE).unwrap()
    }

    fn counter(poller: &InputPoller, id: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        poller.register_handler(id, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        count
    }

    fn tap(input: &SimulatedInput, pin: u8) {
        input.press(pin);
        thread::sleep(ms(20));
        input.release(pin);
        thread::sleep(ms(80));
    }

    #[test]
    fn poller_fires_handler_per_press() {
        let input = SimulatedInput::new();
        let mut poller = poller(&input);
        let next = counter(&poller, "next");
        let off = counter(&poller, "off");

        poller.start();
        tap(&input, 17);
        tap(&input, 17);
        tap(&input, 27);
        poller.stop();

        assert_eq!(next.load(Ordering::SeqCst), 2);
        assert_eq!(off.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_replaces_previous_handler() {
        let input = SimulatedInput::new();
        let mut poller = poller(&input);
        let first = counter(&poller, "next");
        let second = counter(&poller, "next");

        poller.start();
        tap(&input, 17);
        poller.stop();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_handler_does_not_stop_polling() {
        let input = SimulatedInput::new();
        let mut poller = poller(&input);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        poller.register_handler("next", move |_| {
            match c.fetch_add(1, Ordering::SeqCst) {
                0 => anyhow::bail!("first press fails"),
                1 => panic!("second press panics"),
                _ => Ok(()),
            }
        });

        poller.start();
        tap(&input, 17);
        tap(&input, 17);
        tap(&input, 17);
        assert!(poller.is_running());
        poller.stop();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn handler_can_rebind_its_own_button() {
        let handlers: Arc<Mutex<HashMap<ButtonId, Handler>>> = Arc::default();
        let rebound = Arc::new(AtomicUsize::new(0));

        let registry = handlers.clone();
        let r = rebound.clone();
        let first: Handler = Box::new(move |id| {
            let r = r.clone();
            registry.lock().unwrap().insert(
                id.clone(),
                Box::new(move |_| {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
            Ok(())
        });
        handlers.lock().unwrap().insert("next".into(), first);

        let id = ButtonId::from("next");
        dispatch(&handlers, &id);
        dispatch(&handlers, &id);
        dispatch(&handlers, &id);

        assert_eq!(rebound.load(Ordering::SeqCst), 2);
        assert_eq!(handlers.lock().unwrap().len(), 1);
    }

    #[test]
    fn stop_joins_and_start_resumes() {
        let input = SimulatedInput::new();
        let mut poller = poller(&input);
        let next = counter(&poller, "next");

        poller.start();
        poller.stop();
        assert!(!poller.is_running());

        // Presses while stopped are not seen
        input.press(17);
        thread::sleep(ms(20));
        input.release(17);
        assert_eq!(next.load(Ordering::SeqCst), 0);

        poller.start();
        tap(&input, 17);
        poller.stop();
        assert_eq!(next.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unconfigured_pin_read_fails() {
        let mut input = SimulatedInput::new();
        assert!(matches!(input.read_level(4), Err(InputError::Read { pin: 4, .. })));
    }
}
