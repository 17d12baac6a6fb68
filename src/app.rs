//! Application wiring: buttons drive the controller until shutdown.
//!
//! ## Threads
//! - **Poll thread** ([`InputPoller`]): samples buttons, sends the configured
//!   [`ButtonAction`] over an `mpsc` channel. Handlers never touch the
//!   controller directly.
//! - **Pattern thread**: the one running pattern, owned by the [`Controller`].
//! - **Caller's thread** (this module): owns the controller, receives
//!   actions and calls `trigger`, and exits once `running` is cleared.

use crate::config::{ButtonAction, Config};
use crate::controller::Controller;
use crate::error::{ControllerError, HardwareError};
use crate::frame::Display;
use crate::input::{DigitalInput, InputPoller};
use crate::is_running;
use crate::pattern::{Blank, Catalog, CycleSelector, RandomSelector, Selector};
use crate::sink::{DeviceSink, DriverFactory};
use anyhow::Context;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// How often the event loop rechecks the `running` flag.
const EVENT_WAIT: Duration = Duration::from_millis(100);

/// Acquire the strip, start polling buttons and run until `running` is
/// cleared. The strip is blanked and released on every exit path.
pub fn run(
    config: &Config,
    factory: &mut dyn DriverFactory,
    input: Box<dyn DigitalInput>,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let layout = config.layout()?;
    let mut sink = DeviceSink::open(factory, layout)?;
    sink.set_global_brightness(config.display.brightness);
    let mut controller = Controller::new(Display::new(sink), config.stop_timeout());

    // From here on, an early return drops the controller, which blanks the strip.
    let mut poller = InputPoller::new(
        input,
        &config.buttons(),
        config.poll_interval(),
        config.debounce(),
    )
    .map_err(HardwareError::Input)?;

    let (tx, rx) = mpsc::channel();
    for button in &config.buttons {
        let tx = tx.clone();
        let action = button.action;
        poller.register_handler(button.id.clone(), move |_| {
            tx.send(action).context("event loop has stopped")
        });
    }
    drop(tx);

    let catalog = Catalog::builtin();
    let mut random = RandomSelector::new(catalog.clone());
    let mut next: Box<dyn Selector> = match (config.controller.random, config.controller.start_pattern) {
        (true, _) => Box::new(RandomSelector::new(catalog.clone())),
        (false, Some(id)) => Box::new(CycleSelector::after(catalog.clone(), id)),
        (false, None) => Box::new(CycleSelector::new(catalog.clone())),
    };

    if let Some(id) = config.controller.start_pattern {
        let mut start = || catalog.create(id);
        if let Err(e) = controller.trigger(&mut start) {
            tracing::error!("Failed to start '{}': {}", id, e);
        }
    }

    poller.start();
    tracing::info!("Ready: {} buttons, {} patterns", config.buttons.len(), catalog.len());

    while is_running(running) {
        match rx.recv_timeout(EVENT_WAIT) {
            Ok(action) => {
                let mut blank = Blank;
                let selector: &mut dyn Selector = match action {
                    ButtonAction::Next => next.as_mut(),
                    ButtonAction::Random => &mut random,
                    ButtonAction::Off => &mut blank,
                };
                handle_press(&mut controller, action, selector);
            }
            Err(RecvTimeoutError::Timeout) => {}
            // No buttons configured: nothing can send, but the start pattern
            // keeps running until the signal handler clears `running`.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(EVENT_WAIT),
        }
    }

    tracing::info!("Shutting down");
    poller.stop();
    controller.shutdown()?;
    Ok(())
}

/// Trigger the controller for one press. A press while degraded is the
/// explicit request to try a reset first.
fn handle_press(controller: &mut Controller, action: ButtonAction, selector: &mut dyn Selector) {
    tracing::debug!("Handling {:?}", action);
    match controller.trigger(selector) {
        Ok(()) => {}
        Err(ControllerError::Degraded { pattern }) => match controller.reset() {
            Ok(()) => {
                tracing::info!("Recovered from abandoned pattern '{}'", pattern);
                if let Err(e) = controller.trigger(selector) {
                    tracing::error!("{}", e);
                }
            }
            Err(e) => tracing::warn!("Ignoring {:?} press: {}", action, e),
        },
        Err(e) => tracing::error!("{}", e),
    }
}
