use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::registration::{AttendanceRecord, RegistrationLog};
use crate::window::WindowState;

/// Current snapshot format version
pub const STATE_VERSION: &str = "1.0";

/// Durable image of the coordinator state
///
/// `remaining_seconds` and `admin_session_active` are written for readers of
/// the file only. On load the remaining time is recomputed from the window
/// fields and the session flag is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Snapshot {
    pub version: String,
    #[serde(default)]
    pub remaining_seconds: u64,
    #[serde(default)]
    pub initial_duration_seconds: u64,
    #[serde(default)]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub records: Vec<AttendanceRecord>,
    #[serde(default)]
    pub admin_session_active: bool,
}

impl Snapshot {
    /// Capture the current state, stamping the derived fields at `now`
    pub fn capture(
        window: &WindowState,
        log: &RegistrationLog,
        admin_session_active: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            remaining_seconds: window.remaining_seconds(now),
            initial_duration_seconds: window.initial_duration_seconds,
            window_start: window.window_start,
            records: log.records().to_vec(),
            admin_session_active,
        }
    }

    /// Window fields, normalised so the window invariant holds
    pub fn window(&self) -> WindowState {
        WindowState {
            initial_duration_seconds: self.initial_duration_seconds,
            window_start: self.window_start,
        }
        .normalized()
    }

    pub fn into_log(self) -> RegistrationLog {
        RegistrationLog::from_records(self.records)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::capture(
            &WindowState::default(),
            &RegistrationLog::default(),
            false,
            Utc::now(),
        )
    }
}

/// Just enough of a snapshot to check its format
#[derive(Deserialize)]
struct SnapshotHeader {
    version: String,
}

/// Durable storage for a single snapshot
pub trait SnapshotStore: Send + Sync {
    /// Load the stored snapshot, `None` on first run
    fn load(&self) -> Result<Option<Snapshot>>;

    /// Replace the stored snapshot atomically
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// JSON snapshot file, rewritten with write-temp-then-rename
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;

        let header: SnapshotHeader = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;

        // The attendance log cannot be rebuilt, so an unknown format is left
        // on disk untouched rather than replaced.
        if header.version != STATE_VERSION {
            anyhow::bail!(
                "State file {} has version {} (expected {}); move it aside to start fresh",
                self.path.display(),
                header.version,
                STATE_VERSION
            );
        }

        let snapshot: Snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", self.path.display()))?;

        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)
            .context("Failed to serialize state")?;

        crate::platform::atomic_write(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write state file: {}", self.path.display()))?;

        Ok(())
    }
}

/// Platform default location of the state file
pub fn default_state_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "attendance-window")
        .context("Could not determine a data directory for this platform")?;
    Ok(dirs.data_dir().join("state.json"))
}
