//! Session & window coordinator.
//!
//! The coordinator is the only owner of the in-memory state and the only
//! gateway to it. Every mutating operation runs under one exclusive lock and
//! follows the same sequence: compute the new state on a working copy,
//! persist the copy, then commit it. If persisting fails the working copy is
//! discarded, so memory never diverges from the last durable snapshot.
//! Read-only queries take the shared side of the lock.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::auth::{AdminCredentials, LoginThrottle};
use crate::clock::Clock;
use crate::error::CoordinatorError;
use crate::export::{self, ExportFormat};
use crate::registration::{AttendanceRecord, Registration, RegistrationLog, Submission};
use crate::session::SessionManager;
use crate::state::{Snapshot, SnapshotStore};
use crate::window::WindowState;

/// Tunables the coordinator needs from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoordinatorSettings {
    pub default_start_minutes: u32,
    pub default_extend_minutes: u32,
    pub max_failed_logins: usize,
    pub lockout_minutes: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            default_start_minutes: 30,
            default_extend_minutes: 10,
            max_failed_logins: 3,
            lockout_minutes: 10,
        }
    }
}

/// Public view of the coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateView {
    pub remaining_seconds: u64,
    pub record_count: usize,
    pub session_active: bool,
    pub window_active: bool,
    pub default_start_minutes: u32,
    pub default_extend_minutes: u32,
}

/// State shared by all requests
#[derive(Debug)]
struct Inner {
    window: WindowState,
    log: RegistrationLog,
    sessions: SessionManager,
    throttle: LoginThrottle,
}

pub struct Coordinator {
    inner: RwLock<Inner>,
    store: Box<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
}

impl Coordinator {
    /// Load the persisted snapshot (or start empty) and build a coordinator
    ///
    /// No admin session survives a restart; the stored window keeps counting
    /// from its original start instant.
    pub fn open(
        store: Box<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        credentials: AdminCredentials,
        settings: CoordinatorSettings,
    ) -> Result<Self> {
        let snapshot = store.load().context("Failed to load state")?;
        let first_run = snapshot.is_none();
        let snapshot = snapshot.unwrap_or_default();

        let window = snapshot.window();
        let log = snapshot.into_log();

        let coordinator = Self {
            inner: RwLock::new(Inner {
                window,
                log,
                sessions: SessionManager::new(credentials),
                throttle: LoginThrottle::new(settings.max_failed_logins, settings.lockout_minutes),
            }),
            store,
            clock,
            settings,
        };

        // Rewrite immediately so the stored session flag and remaining time
        // reflect this process, and so a first run leaves a file behind.
        {
            let inner = coordinator.write();
            coordinator
                .persist(&inner.window, &inner.log, false)
                .context("Failed to write initial state")?;

            tracing::info!(
                first_run,
                records = inner.log.len(),
                remaining_seconds = inner.window.remaining_seconds(coordinator.clock.now()),
                "Coordinator state loaded"
            );
        }

        Ok(coordinator)
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Authenticate as administrator
    pub fn login(
        &self,
        username: &str,
        secret: &str,
        requester_identity: &str,
    ) -> Result<String, CoordinatorError> {
        let mut inner = self.write();
        let now = self.clock.now();

        if let Some(retry_after_seconds) = inner.throttle.retry_after(requester_identity, now) {
            tracing::warn!(identity = requester_identity, retry_after_seconds, "Login throttled");
            return Err(CoordinatorError::TooManyAttempts { retry_after_seconds });
        }

        let previous = inner.sessions.active().cloned();
        let token = match inner.sessions.login(username, secret, requester_identity, now) {
            Ok(token) => token,
            Err(CoordinatorError::InvalidCredentials) => {
                inner.throttle.record_failure(requester_identity, now);
                tracing::warn!(identity = requester_identity, "Rejected admin login");
                return Err(CoordinatorError::InvalidCredentials);
            }
            Err(e) => {
                tracing::warn!(identity = requester_identity, "Admin login refused: {}", e);
                return Err(e);
            }
        };

        if let Err(e) = self.persist(&inner.window, &inner.log, true) {
            inner.sessions.restore(previous);
            return Err(rollback("login", &e));
        }

        inner.throttle.reset(requester_identity);
        tracing::info!(identity = requester_identity, "Admin session granted");
        Ok(token)
    }

    /// Check a session token without side effects
    pub fn verify_session(&self, token: &str, requester_identity: &str) -> bool {
        self.read().sessions.verify(token, requester_identity)
    }

    /// End the admin session owned by the caller
    pub fn logout(&self, token: &str, requester_identity: &str) -> Result<(), CoordinatorError> {
        let mut inner = self.write();
        let previous = inner.sessions.active().cloned();

        inner.sessions.logout(token, requester_identity)?;

        if let Err(e) = self.persist(&inner.window, &inner.log, false) {
            inner.sessions.restore(previous);
            return Err(rollback("logout", &e));
        }

        tracing::info!(identity = requester_identity, "Admin session ended");
        Ok(())
    }

    /// Remaining time, record count and session flag
    pub fn query_state(&self) -> StateView {
        let inner = self.read();
        let now = self.clock.now();

        StateView {
            remaining_seconds: inner.window.remaining_seconds(now),
            record_count: inner.log.len(),
            session_active: inner.sessions.is_active(),
            window_active: inner.window.is_open(now),
            default_start_minutes: self.settings.default_start_minutes,
            default_extend_minutes: self.settings.default_extend_minutes,
        }
    }

    /// Seconds left in the registration window
    pub fn remaining_seconds(&self) -> u64 {
        self.read().window.remaining_seconds(self.clock.now())
    }

    /// Open a new window, replacing any existing one
    pub fn start(
        &self,
        token: &str,
        requester_identity: &str,
        minutes: Option<u32>,
    ) -> Result<u64, CoordinatorError> {
        let minutes = minutes.unwrap_or(self.settings.default_start_minutes);
        let mut inner = self.write();
        inner.sessions.authorize(token, requester_identity)?;

        let now = self.clock.now();
        let window = WindowState::start(minutes, now)?;
        self.commit_window(&mut inner, window, "start")?;

        tracing::info!(identity = requester_identity, minutes, "Registration window started");
        Ok(window.remaining_seconds(now))
    }

    /// Add minutes to the running window
    pub fn extend(
        &self,
        token: &str,
        requester_identity: &str,
        minutes: Option<u32>,
    ) -> Result<u64, CoordinatorError> {
        let minutes = minutes.unwrap_or(self.settings.default_extend_minutes);
        let mut inner = self.write();
        inner.sessions.authorize(token, requester_identity)?;

        let mut window = inner.window;
        window.extend(minutes)?;
        self.commit_window(&mut inner, window, "extend")?;

        let remaining = window.remaining_seconds(self.clock.now());
        tracing::info!(
            identity = requester_identity,
            minutes,
            remaining_seconds = remaining,
            "Registration window extended"
        );
        Ok(remaining)
    }

    /// Close the window
    pub fn stop(&self, token: &str, requester_identity: &str) -> Result<(), CoordinatorError> {
        let mut inner = self.write();
        inner.sessions.authorize(token, requester_identity)?;

        let mut window = inner.window;
        window.stop();
        self.commit_window(&mut inner, window, "stop")?;

        tracing::info!(identity = requester_identity, "Registration window stopped");
        Ok(())
    }

    /// Accept an attendance submission if the window is open
    pub fn register(&self, submission: Submission) -> Result<Registration, CoordinatorError> {
        let mut inner = self.write();
        let now = self.clock.now();

        let mut log = inner.log.clone();
        let registration = log.register(&inner.window, submission, now)?;

        let session_active = inner.sessions.is_active();
        self.persist(&inner.window, &log, session_active)
            .map_err(|e| rollback("register", &e))?;
        inner.log = log;

        tracing::debug!(
            record_count = registration.record_count,
            remaining_seconds = registration.remaining_seconds,
            "Attendance registered"
        );
        Ok(registration)
    }

    /// Drop every attendance record
    pub fn clear_log(&self, token: &str, requester_identity: &str) -> Result<usize, CoordinatorError> {
        let mut inner = self.write();
        inner.sessions.authorize(token, requester_identity)?;

        let cleared = inner.log.len();
        let empty = RegistrationLog::default();
        let session_active = inner.sessions.is_active();
        self.persist(&inner.window, &empty, session_active)
            .map_err(|e| rollback("clear_log", &e))?;
        inner.log = empty;

        tracing::info!(identity = requester_identity, cleared, "Attendance log cleared");
        Ok(0)
    }

    /// Render the log as a table
    pub fn export_log(&self, format: ExportFormat) -> Result<String, CoordinatorError> {
        export::export_records(self.read().log.records(), format)
    }

    /// Copy of every record, in submission order
    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.read().log.records().to_vec()
    }

    fn commit_window(
        &self,
        inner: &mut Inner,
        window: WindowState,
        operation: &str,
    ) -> Result<(), CoordinatorError> {
        self.persist(&window, &inner.log, inner.sessions.is_active())
            .map_err(|e| rollback(operation, &e))?;
        inner.window = window;
        Ok(())
    }

    fn persist(&self, window: &WindowState, log: &RegistrationLog, session_active: bool) -> Result<()> {
        let snapshot = Snapshot::capture(window, log, session_active, self.clock.now());
        self.store.save(&snapshot)
    }

    // The guarded state is only replaced after a successful persist, so a
    // panic while holding the lock cannot leave it half-updated.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("clock", &self.clock)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn rollback(operation: &str, err: &anyhow::Error) -> CoordinatorError {
    tracing::error!(operation, "Persisting state failed, change rolled back: {:#}", err);
    CoordinatorError::persistence(err)
}
