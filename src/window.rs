use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

/// Seconds per minute, for converting admin-supplied minute values
const SECONDS_PER_MINUTE: u64 = 60;

/// Registration window timer
///
/// Only the budget and the start instant are stored. Remaining time is
/// derived from the wall clock on every read, so it stays correct across
/// restarts and never drifts.
///
/// Invariant: `initial_duration_seconds == 0` iff `window_start.is_none()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct WindowState {
    pub initial_duration_seconds: u64,
    pub window_start: Option<DateTime<Utc>>,
}

impl WindowState {
    /// Open a fresh window of `duration_minutes`, replacing any prior window
    pub fn start(duration_minutes: u32, now: DateTime<Utc>) -> Result<Self, CoordinatorError> {
        if duration_minutes == 0 {
            return Err(CoordinatorError::InvalidDuration);
        }

        Ok(Self {
            initial_duration_seconds: minutes_to_seconds(duration_minutes),
            window_start: Some(now),
        })
    }

    /// Grow the budget of the current window by `extra_minutes`
    ///
    /// The start instant is untouched, so elapsed time is preserved and the
    /// remaining time grows by exactly the added seconds. A window whose
    /// countdown already reached zero still counts as started and can be
    /// reopened this way.
    pub fn extend(&mut self, extra_minutes: u32) -> Result<(), CoordinatorError> {
        if self.window_start.is_none() {
            return Err(CoordinatorError::NoActiveWindow);
        }
        if extra_minutes == 0 {
            return Err(CoordinatorError::InvalidDuration);
        }

        self.initial_duration_seconds = self
            .initial_duration_seconds
            .saturating_add(minutes_to_seconds(extra_minutes));
        Ok(())
    }

    /// Close the window. Idempotent.
    pub fn stop(&mut self) {
        *self = Self::default();
    }

    /// Whether a window has been started and not stopped
    pub fn is_started(&self) -> bool {
        self.window_start.is_some()
    }

    /// Seconds left before the window closes, never negative
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        let Some(start) = self.window_start else {
            return 0;
        };

        // A clock that moved backwards counts as zero elapsed time
        let elapsed = (now - start).num_seconds().max(0) as u64;
        self.initial_duration_seconds.saturating_sub(elapsed)
    }

    /// Whether submissions are currently accepted
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.remaining_seconds(now) > 0
    }

    /// Restore the invariant on state read from disk
    pub fn normalized(self) -> Self {
        match (self.initial_duration_seconds, self.window_start) {
            (0, _) | (_, None) => Self::default(),
            _ => self,
        }
    }
}

fn minutes_to_seconds(minutes: u32) -> u64 {
    u64::from(minutes) * SECONDS_PER_MINUTE
}
