use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;

use crate::error::CoordinatorError;
use crate::window::WindowState;

/// Field name the server stamps on every accepted record
pub const SERVER_TIMESTAMP_FIELD: &str = "server_timestamp";

/// Free-form attendance fields as submitted by a client
///
/// The core does not validate names or values; schema checks belong to
/// whoever builds the form. Fields keep the order they were submitted in.
pub type Submission = IndexMap<String, String>;

/// One accepted submission, immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttendanceRecord {
    #[serde(flatten)]
    pub fields: Submission,
    pub server_timestamp: DateTime<Utc>,
}

impl AttendanceRecord {
    /// Stamp a submission with the server clock
    ///
    /// A client-supplied `server_timestamp` field is discarded.
    pub fn stamp(mut fields: Submission, now: DateTime<Utc>) -> Self {
        fields.shift_remove(SERVER_TIMESTAMP_FIELD);
        Self {
            fields,
            server_timestamp: now,
        }
    }
}

/// Outcome of an accepted registration, computed after the append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub record_count: usize,
    pub remaining_seconds: u64,
}

/// Append-only attendance log; insertion order is submission order
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RegistrationLog {
    records: Vec<AttendanceRecord>,
}

impl RegistrationLog {
    pub fn from_records(records: Vec<AttendanceRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Gate a submission on the window and append it if the window is open
    pub fn register(
        &mut self,
        window: &WindowState,
        submission: Submission,
        now: DateTime<Utc>,
    ) -> Result<Registration, CoordinatorError> {
        if !window.is_open(now) {
            return Err(CoordinatorError::WindowClosed);
        }

        self.records.push(AttendanceRecord::stamp(submission, now));

        Ok(Registration {
            record_count: self.records.len(),
            remaining_seconds: window.remaining_seconds(now),
        })
    }

    /// Drop every record. Irreversible.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
