//! Time-boxed attendance registration under a single administrator.
//!
//! The [`Coordinator`] owns the registration window, the attendance log and
//! the admin session, and persists all of it through a [`SnapshotStore`]
//! after every change. The window's remaining time is derived from the wall
//! clock, so it keeps counting across restarts.

pub mod auth;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod logging;
pub mod platform;
pub mod protocol;
pub mod registration;
pub mod server;
pub mod session;
pub mod state;
pub mod window;

pub use auth::AdminCredentials;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use coordinator::{Coordinator, CoordinatorSettings, StateView};
pub use error::CoordinatorError;
pub use export::ExportFormat;
pub use registration::{AttendanceRecord, Registration, Submission};
pub use state::{FileStore, Snapshot, SnapshotStore};
