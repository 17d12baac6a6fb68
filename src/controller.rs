//! Animation lifecycle controller.
//!
//! The controller owns the [`Display`] while idle. Launching a pattern moves
//! the display into the pattern's thread; the thread hands it back over a
//! channel when the pattern returns. A new pattern can therefore only start
//! once the previous one has given the display back, so two patterns never
//! write to the strip at the same time.
//!
//! ```text
//!   Idle ──trigger(pattern)──> Running ──trigger──> (stopping) ──> Running / Idle
//!                                                       │
//!                                                 stop timeout
//!                                                       v
//!                                                   Degraded ──reset──> Idle
//! ```
//!
//! "Stopping" only exists inside [`Controller::trigger`]: it sets the stop
//! flag and blocks, bounded by the stop timeout, until the display comes
//! back. A pattern that ignores its flag past the timeout is abandoned. It
//! keeps the display, and the controller refuses to launch anything until
//! [`Controller::reset`] gets the display back.
//!
//! ## Rust concepts
//! - Moving a value into a `thread::spawn` closure transfers ownership
//! - `mpsc::Receiver::recv_timeout` for a bounded wait
//! - `catch_unwind` so a panicking pattern still returns what it owns

use crate::error::ControllerError;
use crate::frame::Display;
use crate::pattern::{Blank, Pattern, Selector, StopFlag};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default bound on how long `trigger` waits for a pattern to stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    /// No pattern running; the controller holds the display.
    Idle,
    /// One pattern running and holding the display.
    Running,
    /// A pattern was abandoned (or the display was lost); nothing can launch.
    Degraded,
}

/// A launched pattern: its stop flag and the way back for the display.
struct Task {
    name: String,
    stop: StopFlag,
    done: Receiver<Display>,
    handle: JoinHandle<()>,
}

impl Task {
    fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("Pattern thread '{}' panicked after handing back the display", self.name);
        }
    }
}

pub struct Controller {
    display: Option<Display>,
    active: Option<Task>,
    abandoned: Option<Task>,
    stop_timeout: Duration,
}

impl Controller {
    pub fn new(display: Display, stop_timeout: Duration) -> Self {
        Self {
            display: Some(display),
            active: None,
            abandoned: None,
            stop_timeout,
        }
    }

    pub fn state(&mut self) -> ControllerState {
        self.reap();
        if self.abandoned.is_some() || (self.display.is_none() && self.active.is_none()) {
            ControllerState::Degraded
        } else if self.active.is_some() {
            ControllerState::Running
        } else {
            ControllerState::Idle
        }
    }

    /// Name of the running pattern, if any.
    pub fn active_pattern(&mut self) -> Option<&str> {
        self.reap();
        self.active.as_ref().map(|task| task.name.as_str())
    }

    /// Stop whatever is running, then launch what `selector` picks (or leave
    /// the display blank if it picks nothing).
    pub fn trigger(&mut self, selector: &mut dyn Selector) -> Result<(), ControllerError> {
        if let Some(task) = &self.abandoned {
            tracing::warn!("Trigger refused: pattern '{}' still owns the display", task.name);
            return Err(ControllerError::Degraded {
                pattern: task.name.clone(),
            });
        }

        if let Some(task) = self.active.take() {
            self.stop_task(task)?;
        }

        if self.display.is_none() {
            return Err(ControllerError::DisplayLost);
        }

        match selector.select() {
            Some(pattern) => self.launch(pattern),
            None => {
                if let Some(display) = self.display.as_mut().filter(|d| !d.sink().is_released()) {
                    if let Err(e) = display.blank() {
                        tracing::warn!("Failed to blank display: {}", e);
                    }
                }
                tracing::info!("Display idle");
            }
        }
        Ok(())
    }

    /// Give an abandoned pattern one more stop timeout to hand the display
    /// back. On success the controller is idle again.
    pub fn reset(&mut self) -> Result<(), ControllerError> {
        let Some(task) = self.abandoned.take() else {
            return Ok(());
        };

        match task.done.recv_timeout(self.stop_timeout) {
            Ok(display) => {
                tracing::info!("Abandoned pattern '{}' exited; display recovered", task.name);
                self.display = Some(display);
                task.join();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                let pattern = task.name.clone();
                self.abandoned = Some(task);
                Err(ControllerError::StillRunning { pattern })
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!("Pattern '{}' exited without returning the display", task.name);
                task.join();
                Err(ControllerError::DisplayLost)
            }
        }
    }

    /// Stop the running pattern, blank and release the strip.
    pub fn shutdown(&mut self) -> Result<(), ControllerError> {
        let result = if self.abandoned.is_some() {
            self.reset()
        } else {
            self.trigger(&mut Blank)
        };

        match self.display.as_mut() {
            Some(display) => display.shutdown(),
            None => tracing::warn!(
                "Display still held by an abandoned pattern; it is released when that pattern exits"
            ),
        }
        result
    }

    fn stop_task(&mut self, task: Task) -> Result<(), ControllerError> {
        tracing::info!("Stopping pattern '{}'", task.name);
        let started = Instant::now();
        task.stop.set();

        match task.done.recv_timeout(self.stop_timeout) {
            Ok(display) => {
                tracing::debug!("Pattern '{}' stopped after {:?}", task.name, started.elapsed());
                self.display = Some(display);
                task.join();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(
                    "Pattern '{}' ignored its stop flag for {:?}; abandoning it",
                    task.name,
                    self.stop_timeout
                );
                let pattern = task.name.clone();
                self.abandoned = Some(task);
                Err(ControllerError::PreemptionTimeout {
                    pattern,
                    waited: self.stop_timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!("Pattern '{}' exited without returning the display", task.name);
                task.join();
                Err(ControllerError::DisplayLost)
            }
        }
    }

    fn launch(&mut self, mut pattern: Box<dyn Pattern>) {
        let Some(mut display) = self.display.take() else {
            return;
        };
        let name = pattern.name().to_string();
        let stop = StopFlag::new();
        let (tx, rx) = mpsc::channel();

        let flag = stop.clone();
        let thread_name = name.clone();
        let handle = thread::spawn(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| pattern.run(&mut display, &flag))) {
                Ok(Ok(())) => tracing::debug!("Pattern '{}' returned", thread_name),
                Ok(Err(e)) => tracing::warn!("Pattern '{}' stopped: {}", thread_name, e),
                Err(_) => tracing::error!("Pattern '{}' panicked", thread_name),
            }
            // If the controller is gone the display drops here, which blanks
            // and releases the strip.
            let _ = tx.send(display);
        });

        tracing::info!("Started pattern '{}'", name);
        self.active = Some(Task {
            name,
            stop,
            done: rx,
            handle,
        });
    }

    /// Collect a pattern that returned on its own.
    fn reap(&mut self) {
        let Some(task) = self.active.as_ref() else {
            return;
        };
        match task.done.try_recv() {
            Ok(display) => {
                self.display = Some(display);
                if let Some(task) = self.active.take() {
                    tracing::info!("Pattern '{}' finished", task.name);
                    task.join();
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                if let Some(task) = self.active.take() {
                    tracing::error!("Pattern '{}' exited without returning the display", task.name);
                    task.join();
                }
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Controller shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;
    use crate::error::SinkError;
    use crate::layout::Layout;
    use crate::pattern::{Catalog, CycleSelector, PatternId};
    use crate::sink::{DeviceSink, MemoryDriver};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn controller(timeout: Duration) -> (Controller, MemoryDriver) {
        let layout = Layout::new(4, 4, 4, 4).unwrap();
        let driver = MemoryDriver::new(layout.led_count());
        let display = Display::new(DeviceSink::new(Box::new(driver.clone()), layout));
        (Controller::new(display, timeout), driver)
    }

    /// Tracks how many patterns are inside `run` at once.
    #[derive(Clone, Default)]
    struct Writers {
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
    }

    impl Writers {
        fn enter(&self) {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Draws until stopped, then takes `linger` to acknowledge.
    struct Slow {
        writers: Writers,
        linger: Duration,
    }

    impl Pattern for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn run(&mut self, display: &mut Display, stop: &StopFlag) -> Result<(), SinkError> {
            self.writers.enter();
            while !stop.is_set() {
                display.frame_mut().fill(Color::WHITE);
                display.show()?;
                thread::sleep(Duration::from_millis(5));
            }
            thread::sleep(self.linger);
            self.writers.leave();
            Ok(())
        }
    }

    /// Ignores the stop flag until `release` is set.
    struct Stubborn {
        release: Arc<AtomicBool>,
    }

    impl Pattern for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn run(&mut self, _display: &mut Display, _stop: &StopFlag) -> Result<(), SinkError> {
            while !self.release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    struct Panics;

    impl Pattern for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn run(&mut self, _display: &mut Display, _stop: &StopFlag) -> Result<(), SinkError> {
            panic!("pattern bug");
        }
    }

    struct OneFrame;

    impl Pattern for OneFrame {
        fn name(&self) -> &str {
            "one-frame"
        }

        fn run(&mut self, display: &mut Display, _stop: &StopFlag) -> Result<(), SinkError> {
            display.frame_mut().fill(Color::new(0, 0, 9));
            display.show()
        }
    }

    fn slow(writers: &Writers) -> impl FnMut() -> Option<Box<dyn Pattern>> + use<> {
        let writers = writers.clone();
        move || {
            Some(Box::new(Slow {
                writers: writers.clone(),
                linger: Duration::from_millis(50),
            }) as Box<dyn Pattern>)
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn starts_idle() {
        let (mut controller, _) = controller(TIMEOUT);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.active_pattern(), None);
    }

    #[test]
    fn trigger_launches_pattern() {
        let (mut controller, driver) = controller(TIMEOUT);
        let writers = Writers::default();

        controller.trigger(&mut slow(&writers)).unwrap();

        assert_eq!(controller.state(), ControllerState::Running);
        assert_eq!(controller.active_pattern(), Some("slow"));
        wait_for(|| driver.snapshot().shows > 0);
        assert_eq!(driver.snapshot().emitted[0], Color::WHITE);
    }

    #[test]
    fn rapid_triggers_never_overlap_writers() {
        let (mut controller, _) = controller(TIMEOUT);
        let writers = Writers::default();
        let mut selector = slow(&writers);

        controller.trigger(&mut selector).unwrap();
        controller.trigger(&mut selector).unwrap();
        controller.trigger(&mut selector).unwrap();

        wait_for(|| writers.live.load(Ordering::SeqCst) == 1);
        assert_eq!(controller.state(), ControllerState::Running);
        assert_eq!(writers.peak.load(Ordering::SeqCst), 1);
        assert_eq!(writers.live.load(Ordering::SeqCst), 1);
        assert_eq!(writers.started.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn concurrent_triggers_from_two_threads_leave_one_writer() {
        let (controller, _) = controller(TIMEOUT);
        let controller = Arc::new(Mutex::new(controller));
        let writers = Writers::default();

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let controller = controller.clone();
                let mut selector = slow(&writers);
                thread::spawn(move || {
                    for _ in 0..3 {
                        controller.lock().unwrap().trigger(&mut selector).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        wait_for(|| writers.live.load(Ordering::SeqCst) == 1);
        assert_eq!(controller.lock().unwrap().state(), ControllerState::Running);
        assert_eq!(writers.peak.load(Ordering::SeqCst), 1);
        assert_eq!(writers.started.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn blank_selection_stops_and_goes_idle() {
        let (mut controller, driver) = controller(TIMEOUT);
        let writers = Writers::default();
        controller.trigger(&mut slow(&writers)).unwrap();

        controller.trigger(&mut Blank).unwrap();

        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(writers.live.load(Ordering::SeqCst), 0);
        assert!(driver.snapshot().emitted.iter().all(|&c| c == Color::BLACK));
    }

    #[test]
    fn preemption_timeout_degrades_until_reset() {
        let (mut controller, _) = controller(Duration::from_millis(50));
        let release = Arc::new(AtomicBool::new(false));
        let r = release.clone();
        let mut stubborn = move || {
            Some(Box::new(Stubborn { release: r.clone() }) as Box<dyn Pattern>)
        };
        let writers = Writers::default();

        controller.trigger(&mut stubborn).unwrap();
        let err = controller.trigger(&mut slow(&writers)).unwrap_err();
        assert!(matches!(err, ControllerError::PreemptionTimeout { ref pattern, .. } if pattern == "stubborn"));
        assert_eq!(controller.state(), ControllerState::Degraded);

        // Refuses to start a second writer
        let err = controller.trigger(&mut slow(&writers)).unwrap_err();
        assert!(matches!(err, ControllerError::Degraded { .. }));
        assert!(matches!(controller.reset(), Err(ControllerError::StillRunning { .. })));
        assert_eq!(writers.started.load(Ordering::SeqCst), 0);

        release.store(true, Ordering::SeqCst);
        controller.reset().unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);

        controller.trigger(&mut slow(&writers)).unwrap();
        assert_eq!(controller.state(), ControllerState::Running);
    }

    #[test]
    fn pattern_that_returns_hands_display_back() {
        let (mut controller, driver) = controller(TIMEOUT);
        controller
            .trigger(&mut || Some(Box::new(OneFrame) as Box<dyn Pattern>))
            .unwrap();

        wait_for(|| controller.state() == ControllerState::Idle);
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(driver.snapshot().emitted[0], Color::new(0, 0, 9));
    }

    #[test]
    fn panicking_pattern_does_not_lose_display() {
        let (mut controller, _) = controller(TIMEOUT);
        controller
            .trigger(&mut || Some(Box::new(Panics) as Box<dyn Pattern>))
            .unwrap();
        wait_for(|| controller.state() == ControllerState::Idle);

        let mut cycle = CycleSelector::new(Catalog::with(&[PatternId::Solid]));
        controller.trigger(&mut cycle).unwrap();
        assert_eq!(controller.active_pattern(), Some("solid"));
    }

    #[test]
    fn shutdown_stops_pattern_and_releases_strip() {
        let (mut controller, driver) = controller(TIMEOUT);
        let writers = Writers::default();
        controller.trigger(&mut slow(&writers)).unwrap();

        controller.shutdown().unwrap();
        controller.shutdown().unwrap();

        let strip = driver.snapshot();
        assert_eq!(writers.live.load(Ordering::SeqCst), 0);
        assert_eq!(strip.cleanups, 1);
        assert!(strip.emitted.iter().all(|&c| c == Color::BLACK));
    }

    #[test]
    fn drop_shuts_down() {
        let (mut controller, driver) = controller(TIMEOUT);
        let writers = Writers::default();
        controller.trigger(&mut slow(&writers)).unwrap();
        drop(controller);
        assert_eq!(driver.snapshot().cleanups, 1);
        assert_eq!(writers.live.load(Ordering::SeqCst), 0);
    }
}
