//! Background status monitor.
//!
//! Polls the status register at a fixed cadence, keeps the "Device Status" property
//! current and, when the code moves to a new non-nominal value, re-reads LED enables
//! and shutter state and pushes them through the [`ChangeBus`].
//!
//! A return to nominal publishes "No Error" but pushes nothing.

use crate::bus::ChangeBus;
use crate::codec;
use crate::facade::ChrolisFacade;
use crate::status::StatusCode;
use chrolis_core::{ChrolisError, Observable, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// State shared between the hub and its polling thread.
#[derive(Clone)]
pub struct StatusMonitor {
    facade: Arc<dyn ChrolisFacade>,
    bus: Arc<ChangeBus>,
    status: Observable<String>,
    /// Last observed status code. Written only by the polling thread.
    last_code: Arc<AtomicU32>,
}

impl StatusMonitor {
    pub fn new(
        facade: Arc<dyn ChrolisFacade>,
        bus: Arc<ChangeBus>,
        status: Observable<String>,
        last_code: Arc<AtomicU32>,
    ) -> Self {
        Self {
            facade,
            bus,
            status,
            last_code,
        }
    }

    /// Last status code observed by [`poll_once`](Self::poll_once).
    pub fn last_code(&self) -> StatusCode {
        StatusCode(self.last_code.load(Ordering::SeqCst))
    }

    /// Run one poll cycle.
    ///
    /// Returns `true` if the code changed to a non-nominal value and a push was made.
    pub fn poll_once(&self) -> Result<bool> {
        let code = StatusCode(self.facade.read_status_code()?);
        let previous = StatusCode(self.last_code.swap(code.0, Ordering::SeqCst));

        self.status.publish(code.message());

        if code == previous || code.is_nominal() {
            return Ok(false);
        }

        if code.is_unrecognised() {
            warn!(code = code.0, "{}", ChrolisError::UnknownHardwareState(code.0));
        } else {
            info!(code = code.0, status = %code, "CHROLIS status changed");
        }

        self.push_enables();
        self.push_shutter();
        Ok(true)
    }

    fn push_enables(&self) {
        let states = match self.facade.read_all_channel_enables() {
            Ok(states) => states,
            Err(e) => {
                warn!(error = %e, "Failed to re-read LED enables after status change");
                return;
            }
        };

        debug!(mask = codec::encode(&states), "Pushing LED enable states");
        self.bus.state.notify(0, i64::from(codec::encode(&states)));
        for (led, &enabled) in states.iter().enumerate() {
            self.bus.state.notify(led + 1, i64::from(enabled));
        }
    }

    fn push_shutter(&self) {
        match self.facade.read_shutter_open() {
            Ok(open) => self.bus.shutter.notify(0, i64::from(open)),
            Err(e) => warn!(error = %e, "Failed to re-read shutter after status change"),
        }
    }

    /// Poll until `running` is cleared or a status read fails.
    ///
    /// Cycles are skipped while the facade reports not connected. A failed read clears
    /// `running` and ends the loop.
    pub fn run(&self, running: &AtomicBool, interval: Duration) {
        info!(?interval, "Status monitor started");

        while running.load(Ordering::SeqCst) {
            if self.facade.is_connected() {
                if let Err(e) = self.poll_once() {
                    error!(error = %e, "Status read failed, stopping monitor");
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
            thread::sleep(interval);
        }

        info!("Status monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Fault, Operation, SimulatedChrolis, SIMULATED_SERIAL};
    use parking_lot::Mutex;

    struct Fixture {
        sim: Arc<SimulatedChrolis>,
        bus: Arc<ChangeBus>,
        monitor: StatusMonitor,
        status: Observable<String>,
        state_events: Arc<Mutex<Vec<(usize, i64)>>>,
        shutter_events: Arc<Mutex<Vec<(usize, i64)>>>,
    }

    fn fixture() -> Fixture {
        let sim = Arc::new(SimulatedChrolis::new());
        sim.connect(SIMULATED_SERIAL).unwrap();
        let bus = Arc::new(ChangeBus::new());
        let status = Observable::new("Device Status", String::new()).read_only();
        let monitor = StatusMonitor::new(
            sim.clone(),
            bus.clone(),
            status.clone(),
            Arc::new(AtomicU32::new(0)),
        );

        let state_events = Arc::new(Mutex::new(Vec::new()));
        let sink = state_events.clone();
        bus.state.install(move |i, v| sink.lock().push((i, v)));

        let shutter_events = Arc::new(Mutex::new(Vec::new()));
        let sink = shutter_events.clone();
        bus.shutter.install(move |i, v| sink.lock().push((i, v)));

        Fixture {
            sim,
            bus,
            monitor,
            status,
            state_events,
            shutter_events,
        }
    }

    #[test]
    fn test_nominal_poll_publishes_without_push() {
        let f = fixture();
        let mut rx = f.status.subscribe();

        assert!(!f.monitor.poll_once().unwrap());
        assert_eq!(f.status.get(), "No Error");
        assert!(rx.has_changed().unwrap());
        assert!(f.state_events.lock().is_empty());
    }

    #[test]
    fn test_unchanged_code_republishes_status() {
        let f = fixture();
        f.sim.set_status_code(4);
        assert!(f.monitor.poll_once().unwrap());

        let mut rx = f.status.subscribe();
        assert!(!f.monitor.poll_once().unwrap());
        assert!(rx.has_changed().unwrap());
        assert_eq!(f.status.get(), "Interlock is Open");
    }

    #[test]
    fn test_transition_pushes_mask_and_channels() {
        let f = fixture();
        f.sim
            .set_hardware_enables([true, true, false, true, true, true]);
        f.sim.set_status_code(4);

        assert!(f.monitor.poll_once().unwrap());

        let events = f.state_events.lock().clone();
        assert_eq!(events.len(), 7);
        assert_eq!(events[0], (0, 0b111011));
        assert_eq!(events[3], (3, 0));
        assert_eq!(f.shutter_events.lock().as_slice(), &[(0, 1)]);
        assert_eq!(f.monitor.last_code(), StatusCode(4));
    }

    #[test]
    fn test_return_to_nominal_does_not_push() {
        let f = fixture();
        f.sim.set_status_code(0x10);
        f.monitor.poll_once().unwrap();
        f.state_events.lock().clear();

        f.sim.set_status_code(0);
        assert!(!f.monitor.poll_once().unwrap());
        assert!(f.state_events.lock().is_empty());
        assert_eq!(f.status.get(), "No Error");
    }

    #[test]
    fn test_cleared_slot_receives_nothing() {
        let f = fixture();
        f.bus.shutter.clear();
        f.sim.set_status_code(1);
        f.monitor.poll_once().unwrap();

        assert_eq!(f.state_events.lock().len(), 7);
        assert!(f.shutter_events.lock().is_empty());
    }

    #[test]
    fn test_unknown_code_publishes_fallback() {
        let f = fixture();
        f.sim.set_status_code(0x200);
        assert!(f.monitor.poll_once().unwrap());
        assert_eq!(f.status.get(), "Unknown Status");
    }

    #[test]
    fn test_enable_reread_failure_still_pushes_shutter() {
        let f = fixture();
        f.sim.fail_next(Operation::ReadAllChannelEnables, Fault::Unavailable);
        f.sim.set_status_code(4);
        f.monitor.poll_once().unwrap();

        assert!(f.state_events.lock().is_empty());
        assert_eq!(f.shutter_events.lock().len(), 1);
    }

    #[test]
    fn test_read_failure_stops_loop() {
        let f = fixture();
        f.sim.fail_always(Operation::ReadStatusCode, Fault::Unavailable);
        let running = AtomicBool::new(true);

        f.monitor.run(&running, Duration::from_millis(1));
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_disconnected_cycles_skip_reads() {
        let f = fixture();
        f.sim.set_connected(false);
        let running = Arc::new(AtomicBool::new(true));

        let monitor = f.monitor.clone();
        let flag = running.clone();
        let handle = thread::spawn(move || monitor.run(&flag, Duration::from_millis(1)));
        thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();

        assert_eq!(f.sim.call_count(Operation::ReadStatusCode), 0);
    }
}
