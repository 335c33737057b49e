// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Monotonic event timestamps.
//!
//! Event timestamps must never decrease for a given origin, even when the
//! wall clock steps backwards (NTP corrections, suspended laptops). The
//! [`EventClock`] hands out wall-clock times clamped to be at least the last
//! issued or observed timestamp.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Trait for getting the current wall clock time.
///
/// This allows injecting a mock clock for testing.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation using `chrono::Utc::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: ClockSource> ClockSource for &C {
    fn now(&self) -> DateTime<Utc> {
        (*self).now()
    }
}

/// A clock producing non-decreasing timestamps for one origin.
pub struct EventClock<C: ClockSource = SystemClock> {
    clock: C,
    last: Mutex<Option<DateTime<Utc>>>,
}

impl EventClock<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for EventClock<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ClockSource> EventClock<C> {
    /// Creates an event clock with a custom clock source.
    pub fn with_clock(clock: C) -> Self {
        EventClock {
            clock,
            last: Mutex::new(None),
        }
    }

    /// Returns the next timestamp: the wall time, or the last timestamp if
    /// the wall clock went backwards.
    pub fn now(&self) -> DateTime<Utc> {
        let physical = self.clock.now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());

        let ts = match *last {
            Some(prev) if prev > physical => prev,
            _ => physical,
        };
        *last = Some(ts);
        ts
    }

    /// Advances the clock past a timestamp seen on another event, so that
    /// anything stamped afterwards does not sort before it.
    pub fn observe(&self, seen: DateTime<Utc>) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if prev >= seen => {}
            _ => *last = Some(seen),
        }
    }

    /// The most recent timestamp issued or observed.
    pub fn last(&self) -> Option<DateTime<Utc>> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
