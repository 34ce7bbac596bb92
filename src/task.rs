// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Cooperative signalling and the monitor's background tasks.
//!
//! There is a single core and no scheduler: tasks are polled from the exception router and from
//! the supervise loop with the current monotonic time.

use core::sync::atomic::{AtomicBool, Ordering};

/// Nanoseconds per second.
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Heartbeat LED toggle period.
pub const HEARTBEAT_PERIOD_NS: u64 = NS_PER_SEC;

/// A one-shot wake-up flag shared between an interrupt handler and a waiter.
#[derive(Debug, Default)]
pub struct Signal {
    raised: AtomicBool,
}

impl Signal {
    /// Creates a lowered signal.
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Raises the signal, waking the waiter.
    pub fn signal(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Lowers the signal, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    /// Returns whether the signal is raised, without lowering it.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Calls `idle` until the signal is raised, then lowers it.
    pub fn await_signal(&self, mut idle: impl FnMut()) {
        while !self.take() {
            idle();
        }
    }
}

/// The board LEDs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Led {
    /// Heartbeat, may also be driven by the applet.
    Blue,
    /// Firmware activity, reserved to the monitor.
    White,
}

impl Led {
    /// Parses a LED name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("blue") {
            Some(Self::Blue)
        } else if name.eq_ignore_ascii_case("white") {
            Some(Self::White)
        } else {
            None
        }
    }
}

/// Work which fell due while polling background tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DueTask {
    /// The pending firmware update should now be written and the board reset.
    ApplyUpdate,
}

/// Background tasks of the monitor.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    next_heartbeat: u64,
    heartbeat_on: bool,
    apply_at: Option<u64>,
    flashing_on: bool,
}

impl BackgroundTasks {
    /// Creates an idle set of tasks.
    pub const fn new() -> Self {
        Self {
            next_heartbeat: 0,
            heartbeat_on: false,
            apply_at: None,
            flashing_on: false,
        }
    }

    /// Schedules the pending firmware update to be applied once `delay` nanoseconds have passed.
    pub fn schedule_apply(&mut self, now: u64, delay: u64) {
        self.apply_at = Some(now.saturating_add(delay));
    }

    /// Returns whether a firmware update is scheduled but not yet due.
    pub fn apply_scheduled(&self) -> bool {
        self.apply_at.is_some()
    }

    /// Runs whatever is due at `now`.
    ///
    /// `set_led` is called with the new heartbeat state whenever it toggles.
    pub fn poll(&mut self, now: u64, mut set_led: impl FnMut(Led, bool)) -> Option<DueTask> {
        if now >= self.next_heartbeat {
            self.heartbeat_on = !self.heartbeat_on;
            set_led(Led::Blue, self.heartbeat_on);
            self.next_heartbeat = now.saturating_add(HEARTBEAT_PERIOD_NS);
        }

        match self.apply_at {
            Some(at) if now >= at => {
                self.apply_at = None;
                Some(DueTask::ApplyUpdate)
            }
            _ => None,
        }
    }

    /// Toggles the flash-in-progress indicator, returning its new state.
    pub fn flash_progress(&mut self) -> bool {
        self.flashing_on = !self.flashing_on;
        self.flashing_on
    }

    /// Turns the flash-in-progress indicator off.
    pub fn flash_done(&mut self) -> bool {
        self.flashing_on = false;
        self.flashing_on
    }
}
