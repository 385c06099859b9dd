//! Request/response envelope between the transport and the coordinator.
//!
//! One JSON object per request, tagged by `op`. Successful responses carry
//! `"ok": true` plus an operation-specific payload; failures carry the
//! error's status, stable code and message.

use serde::{Deserialize, Serialize};

use crate::coordinator::{Coordinator, StateView};
use crate::error::CoordinatorError;
use crate::export::ExportFormat;
use crate::registration::{Registration, Submission};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Login { username: String, secret: String },
    VerifySession { token: String },
    Logout { token: String },
    QueryState,
    Start {
        token: String,
        #[serde(default)]
        minutes: Option<u32>,
    },
    Extend {
        token: String,
        #[serde(default)]
        minutes: Option<u32>,
    },
    Stop { token: String },
    Register { fields: Submission },
    ClearLog { token: String },
    ExportLog {
        #[serde(default)]
        format: ExportFormat,
    },
}

impl Request {
    /// Operation name, for logging
    pub fn op(&self) -> &'static str {
        match self {
            Request::Login { .. } => "login",
            Request::VerifySession { .. } => "verify_session",
            Request::Logout { .. } => "logout",
            Request::QueryState => "query_state",
            Request::Start { .. } => "start",
            Request::Extend { .. } => "extend",
            Request::Stop { .. } => "stop",
            Request::Register { .. } => "register",
            Request::ClearLog { .. } => "clear_log",
            Request::ExportLog { .. } => "export_log",
        }
    }
}

/// Operation-specific success payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Token { token: String },
    SessionValid { session_valid: bool },
    Ack {},
    State(StateView),
    Remaining { remaining_seconds: u64 },
    Registered(Registration),
    Cleared { record_count: usize },
    Export {
        format: ExportFormat,
        content_type: &'static str,
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success {
        ok: bool,
        #[serde(flatten)]
        payload: Payload,
    },
    Failure {
        ok: bool,
        status: u16,
        code: &'static str,
        error: String,
    },
}

impl Response {
    pub fn success(payload: Payload) -> Self {
        Response::Success { ok: true, payload }
    }

    pub fn failure(err: &CoordinatorError) -> Self {
        Response::Failure {
            ok: false,
            status: err.status(),
            code: err.code(),
            error: err.to_string(),
        }
    }

    /// Response for a request the transport could not decode
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Response::Failure {
            ok: false,
            status: 400,
            code: "bad_request",
            error: reason.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Success { .. })
    }
}

impl From<Result<Payload, CoordinatorError>> for Response {
    fn from(result: Result<Payload, CoordinatorError>) -> Self {
        match result {
            Ok(payload) => Response::success(payload),
            Err(err) => Response::failure(&err),
        }
    }
}

/// Execute one request on behalf of `identity`
pub fn dispatch(coordinator: &Coordinator, identity: &str, request: Request) -> Response {
    let result = match request {
        Request::Login { username, secret } => coordinator
            .login(&username, &secret, identity)
            .map(|token| Payload::Token { token }),
        Request::VerifySession { token } => Ok(Payload::SessionValid {
            session_valid: coordinator.verify_session(&token, identity),
        }),
        Request::Logout { token } => coordinator.logout(&token, identity).map(|()| Payload::Ack {}),
        Request::QueryState => Ok(Payload::State(coordinator.query_state())),
        Request::Start { token, minutes } => coordinator
            .start(&token, identity, minutes)
            .map(|remaining_seconds| Payload::Remaining { remaining_seconds }),
        Request::Extend { token, minutes } => coordinator
            .extend(&token, identity, minutes)
            .map(|remaining_seconds| Payload::Remaining { remaining_seconds }),
        Request::Stop { token } => coordinator.stop(&token, identity).map(|()| Payload::Ack {}),
        Request::Register { fields } => coordinator.register(fields).map(Payload::Registered),
        Request::ClearLog { token } => coordinator
            .clear_log(&token, identity)
            .map(|record_count| Payload::Cleared { record_count }),
        Request::ExportLog { format } => coordinator.export_log(format).map(|body| Payload::Export {
            format,
            content_type: format.content_type(),
            body,
        }),
    };

    result.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AdminCredentials;
    use crate::clock::ManualClock;
    use crate::coordinator::CoordinatorSettings;
    use crate::state::FileStore;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn coordinator(dir: &TempDir) -> (Coordinator, ManualClock) {
        let clock = ManualClock::default();
        let coordinator = Coordinator::open(
            Box::new(FileStore::new(dir.path().join("state.json"))),
            Arc::new(clock.clone()),
            AdminCredentials::new("admin", "correct"),
            CoordinatorSettings::default(),
        )
        .unwrap();
        (coordinator, clock)
    }

    fn call(coordinator: &Coordinator, identity: &str, request: Value) -> Value {
        let request: Request = serde_json::from_value(request).unwrap();
        serde_json::to_value(dispatch(coordinator, identity, request)).unwrap()
    }

    #[test]
    fn test_request_decoding_applies_defaults() {
        let start: Request = serde_json::from_value(json!({"op": "start", "token": "t"})).unwrap();
        assert_eq!(
            start,
            Request::Start {
                token: "t".to_string(),
                minutes: None
            }
        );

        let export: Request = serde_json::from_value(json!({"op": "export_log"})).unwrap();
        assert_eq!(export, Request::ExportLog { format: ExportFormat::Csv });
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        assert!(serde_json::from_value::<Request>(json!({"op": "reboot"})).is_err());
    }

    #[test]
    fn test_login_start_register_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _clock) = coordinator(&dir);

        let login = call(
            &coordinator,
            "10.0.0.1",
            json!({"op": "login", "username": "admin", "secret": "correct"}),
        );
        assert_eq!(login["ok"], true);
        let token = login["token"].as_str().unwrap().to_string();

        let start = call(
            &coordinator,
            "10.0.0.1",
            json!({"op": "start", "token": token, "minutes": 2}),
        );
        assert_eq!(start, json!({"ok": true, "remaining_seconds": 120}));

        let registered = call(
            &coordinator,
            "10.0.0.99",
            json!({"op": "register", "fields": {"dni": "12345678"}}),
        );
        assert_eq!(registered["ok"], true);
        assert_eq!(registered["record_count"], 1);

        let state = call(&coordinator, "10.0.0.99", json!({"op": "query_state"}));
        assert_eq!(state["record_count"], 1);
        assert_eq!(state["session_active"], true);
        assert_eq!(state["window_active"], true);
    }

    #[test]
    fn test_failures_carry_status_and_code() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _clock) = coordinator(&dir);

        let login = call(
            &coordinator,
            "10.0.0.1",
            json!({"op": "login", "username": "admin", "secret": "nope"}),
        );
        assert_eq!(login["ok"], false);
        assert_eq!(login["status"], 401);
        assert_eq!(login["code"], "invalid_credentials");

        let register = call(
            &coordinator,
            "10.0.0.1",
            json!({"op": "register", "fields": {}}),
        );
        assert_eq!(register["code"], "window_closed");

        let export = call(&coordinator, "10.0.0.1", json!({"op": "export_log"}));
        assert_eq!(export["status"], 404);
    }

    #[test]
    fn test_verify_and_logout() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _clock) = coordinator(&dir);
        let token = coordinator.login("admin", "correct", "10.0.0.1").unwrap();

        let valid = call(
            &coordinator,
            "10.0.0.1",
            json!({"op": "verify_session", "token": token}),
        );
        assert_eq!(valid, json!({"ok": true, "session_valid": true}));

        let logout = call(&coordinator, "10.0.0.1", json!({"op": "logout", "token": token}));
        assert_eq!(logout, json!({"ok": true}));

        let valid = call(
            &coordinator,
            "10.0.0.1",
            json!({"op": "verify_session", "token": token}),
        );
        assert_eq!(valid["session_valid"], false);
    }

    #[test]
    fn test_bad_request_shape() {
        let value = serde_json::to_value(Response::bad_request("malformed")).unwrap();
        assert_eq!(
            value,
            json!({"ok": false, "status": 400, "code": "bad_request", "error": "malformed"})
        );
    }
}
