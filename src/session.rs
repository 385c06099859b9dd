use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::auth::AdminCredentials;
use crate::error::CoordinatorError;

/// Hex characters kept from the token digest
const TOKEN_LEN: usize = 16;

/// The single administrator session
///
/// Token, owner and issue time are always set together; the session is
/// represented as `Option<AdminSession>` so a partial session cannot exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSession {
    pub token: String,
    pub owner_identity: String,
    pub issued_at: DateTime<Utc>,
}

/// Owner of the one-admin-at-a-time session
///
/// Sessions are process-local: they are not persisted, so a restart forces
/// the administrator to log in again. Sessions have no expiry and live until
/// logout.
#[derive(Debug, Clone)]
pub struct SessionManager {
    credentials: AdminCredentials,
    active: Option<AdminSession>,
}

impl SessionManager {
    pub fn new(credentials: AdminCredentials) -> Self {
        Self {
            credentials,
            active: None,
        }
    }

    /// Authenticate and take (or re-take) the admin session
    ///
    /// A login from the identity that already owns the session rotates its
    /// token, which lets a reconnecting administrator recover. A login from
    /// any other identity while a session exists fails with
    /// `SessionConflict` and leaves the existing session untouched.
    pub fn login(
        &mut self,
        username: &str,
        secret: &str,
        requester_identity: &str,
        now: DateTime<Utc>,
    ) -> Result<String, CoordinatorError> {
        if !self.credentials.verify(username, secret) {
            return Err(CoordinatorError::InvalidCredentials);
        }

        if let Some(existing) = &self.active {
            if existing.owner_identity != requester_identity {
                return Err(CoordinatorError::SessionConflict);
            }
        }

        let token = self.issue_token(requester_identity, now);
        self.active = Some(AdminSession {
            token: token.clone(),
            owner_identity: requester_identity.to_string(),
            issued_at: now,
        });

        Ok(token)
    }

    /// True iff a session exists and both token and owner match exactly
    pub fn verify(&self, token: &str, requester_identity: &str) -> bool {
        self.active.as_ref().is_some_and(|session| {
            let token_ok = session.token.as_bytes().ct_eq(token.as_bytes());
            bool::from(token_ok) && session.owner_identity == requester_identity
        })
    }

    /// Guard for privileged operations
    pub fn authorize(&self, token: &str, requester_identity: &str) -> Result<(), CoordinatorError> {
        if self.verify(token, requester_identity) {
            Ok(())
        } else {
            Err(CoordinatorError::NotAuthorized)
        }
    }

    /// End the session if, and only if, the caller owns it
    pub fn logout(&mut self, token: &str, requester_identity: &str) -> Result<(), CoordinatorError> {
        self.authorize(token, requester_identity)?;
        self.active = None;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&AdminSession> {
        self.active.as_ref()
    }

    /// Replace the active session wholesale, used to roll back a failed persist
    pub(crate) fn restore(&mut self, session: Option<AdminSession>) {
        self.active = session;
    }

    fn issue_token(&self, requester_identity: &str, now: DateTime<Utc>) -> String {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(requester_identity.as_bytes());
        hasher.update(now.to_rfc3339().as_bytes());
        hasher.update(self.credentials.secret_material());
        hasher.update(nonce);

        let mut token = hex::encode(hasher.finalize());
        token.truncate(TOKEN_LEN);
        token
    }
}
