use thiserror::Error;

/// Failure outcomes of coordinator operations
///
/// All variants are recoverable at the request boundary. Business-rule
/// rejections never touch state; `PersistenceFailure` is the only variant
/// raised after a mutation was computed, and that mutation has already been
/// rolled back when the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("another administrator is already connected")]
    SessionConflict,

    #[error("administrator session is not valid")]
    NotAuthorized,

    #[error("no active registration window")]
    NoActiveWindow,

    #[error("the registration window is closed")]
    WindowClosed,

    #[error("no attendance records")]
    NoRecords,

    #[error("failed to persist state: {reason}")]
    PersistenceFailure { reason: String },

    #[error("too many failed login attempts, retry in {retry_after_seconds} seconds")]
    TooManyAttempts { retry_after_seconds: u64 },

    #[error("duration must be at least one minute")]
    InvalidDuration,
}

impl CoordinatorError {
    /// Stable machine-readable identifier for the transport layer
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::SessionConflict => "session_conflict",
            Self::NotAuthorized => "not_authorized",
            Self::NoActiveWindow => "no_active_window",
            Self::WindowClosed => "window_closed",
            Self::NoRecords => "no_records",
            Self::PersistenceFailure { .. } => "persistence_failure",
            Self::TooManyAttempts { .. } => "too_many_attempts",
            Self::InvalidDuration => "invalid_duration",
        }
    }

    /// HTTP-style status the transport reports for this failure
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidCredentials => 401,
            Self::SessionConflict => 409,
            Self::NotAuthorized => 403,
            Self::NoActiveWindow | Self::WindowClosed | Self::InvalidDuration => 400,
            Self::NoRecords => 404,
            Self::PersistenceFailure { .. } => 500,
            Self::TooManyAttempts { .. } => 429,
        }
    }

    pub(crate) fn persistence(err: &anyhow::Error) -> Self {
        Self::PersistenceFailure {
            reason: format!("{:#}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_failure_is_distinct_from_business_errors() {
        let err = CoordinatorError::persistence(&anyhow::anyhow!("disk full"));
        assert_eq!(err.code(), "persistence_failure");
        assert_eq!(err.status(), 500);
        assert!(err.to_string().contains("disk full"));

        assert_ne!(CoordinatorError::WindowClosed.status(), err.status());
    }

    #[test]
    fn test_credential_errors_do_not_reveal_field() {
        let message = CoordinatorError::InvalidCredentials.to_string();
        assert!(!message.contains("user"));
        assert!(!message.contains("secret"));
    }
}
