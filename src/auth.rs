use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Length in bytes of a SHA-256 digest
const DIGEST_LEN: usize = 32;

/// Tracked identities above which stale failure histories are swept
const THROTTLE_SWEEP_THRESHOLD: usize = 256;

/// Administrator credentials, held only as SHA-256 digests
///
/// The raw secret is hashed when the credentials are built and is not kept.
#[derive(Clone)]
pub struct AdminCredentials {
    username_hash: [u8; DIGEST_LEN],
    secret_hash: [u8; DIGEST_LEN],
}

impl AdminCredentials {
    /// Build credentials from a plaintext username and secret
    pub fn new(username: &str, secret: &str) -> Self {
        Self {
            username_hash: digest(username.as_bytes()),
            secret_hash: digest(secret.as_bytes()),
        }
    }

    /// Build credentials from a plaintext username and a hex SHA-256 secret hash
    pub fn from_secret_hash(username: &str, secret_sha256: &str) -> Result<Self> {
        let bytes = hex::decode(secret_sha256.trim())
            .context("Secret hash is not valid hex")?;
        let secret_hash: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Secret hash must be {} bytes", DIGEST_LEN))?;

        Ok(Self {
            username_hash: digest(username.as_bytes()),
            secret_hash,
        })
    }

    /// Hex SHA-256 of a secret, the form accepted by `from_secret_hash`
    pub fn hash_secret(secret: &str) -> String {
        hex::encode(digest(secret.as_bytes()))
    }

    /// Check a candidate username and secret
    ///
    /// Both digests are always compared so timing does not reveal which
    /// field was wrong.
    pub fn verify(&self, username: &str, secret: &str) -> bool {
        let username_ok = digest(username.as_bytes())
            .as_slice()
            .ct_eq(self.username_hash.as_slice());
        let secret_ok = digest(secret.as_bytes())
            .as_slice()
            .ct_eq(self.secret_hash.as_slice());
        bool::from(username_ok & secret_ok)
    }

    /// Secret digest, mixed into issued session tokens
    pub(crate) fn secret_material(&self) -> &[u8] {
        &self.secret_hash
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials").finish_non_exhaustive()
    }
}

fn digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

/// Per-identity limiter for failed login attempts
#[derive(Debug, Clone)]
pub struct LoginThrottle {
    failures: HashMap<String, Vec<DateTime<Utc>>>,
    max_failures: usize,
    window: Duration,
}

impl LoginThrottle {
    pub fn new(max_failures: usize, window_minutes: u32) -> Self {
        Self {
            failures: HashMap::new(),
            max_failures,
            window: Duration::minutes(i64::from(window_minutes)),
        }
    }

    /// Seconds until `identity` may try again, or `None` if allowed now
    pub fn retry_after(&mut self, identity: &str, now: DateTime<Utc>) -> Option<u64> {
        let window = self.window;
        let attempts = self.failures.get_mut(identity)?;

        attempts.retain(|&failed_at| now - failed_at < window);
        if attempts.is_empty() {
            self.failures.remove(identity);
            return None;
        }
        if attempts.len() < self.max_failures {
            return None;
        }

        let oldest = attempts.first()?;
        let wait = (*oldest + window - now).num_seconds().max(1);
        Some(wait as u64)
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self, identity: &str, now: DateTime<Utc>) {
        if self.failures.len() >= THROTTLE_SWEEP_THRESHOLD {
            self.sweep(now);
        }

        self.failures
            .entry(identity.to_string())
            .or_default()
            .push(now);
    }

    /// Forget the failure history of `identity`
    pub fn reset(&mut self, identity: &str) {
        self.failures.remove(identity);
    }

    /// Drop failures older than the lockout window, and identities left empty
    fn sweep(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.failures.retain(|_, attempts| {
            attempts.retain(|&failed_at| now - failed_at < window);
            !attempts.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_verify_accepts_matching_credentials() {
        let creds = AdminCredentials::new("admin", "correct horse");
        assert!(creds.verify("admin", "correct horse"));
    }

    #[test]
    fn test_verify_rejects_wrong_username_or_secret() {
        let creds = AdminCredentials::new("admin", "correct horse");
        assert!(!creds.verify("admin", "battery staple"));
        assert!(!creds.verify("root", "correct horse"));
        assert!(!creds.verify("", ""));
    }

    #[test]
    fn test_hashed_secret_round_trip() {
        let hash = AdminCredentials::hash_secret("s3cret");
        assert_eq!(hash.len(), 64);

        let creds = AdminCredentials::from_secret_hash("admin", &hash).unwrap();
        assert!(creds.verify("admin", "s3cret"));
        assert!(!creds.verify("admin", "other"));
    }

    #[test]
    fn test_from_secret_hash_rejects_malformed_hex() {
        assert!(AdminCredentials::from_secret_hash("admin", "not-hex").is_err());
        assert!(AdminCredentials::from_secret_hash("admin", "abcd").is_err());
    }

    #[test]
    fn test_debug_does_not_leak_digests() {
        let creds = AdminCredentials::new("admin", "secret");
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains(&AdminCredentials::hash_secret("secret")));
    }

    #[test]
    fn test_throttle_blocks_after_max_failures() {
        let mut throttle = LoginThrottle::new(3, 10);

        for i in 0..3 {
            assert_eq!(throttle.retry_after("10.0.0.5", t0()), None);
            throttle.record_failure("10.0.0.5", t0() + Duration::seconds(i));
        }

        let wait = throttle.retry_after("10.0.0.5", t0() + Duration::seconds(5));
        assert_eq!(wait, Some(595));
    }

    #[test]
    fn test_throttle_is_per_identity() {
        let mut throttle = LoginThrottle::new(1, 10);
        throttle.record_failure("10.0.0.5", t0());

        assert!(throttle.retry_after("10.0.0.5", t0()).is_some());
        assert_eq!(throttle.retry_after("10.0.0.6", t0()), None);
    }

    #[test]
    fn test_throttle_expires_after_window() {
        let mut throttle = LoginThrottle::new(2, 10);
        throttle.record_failure("a", t0());
        throttle.record_failure("a", t0());

        assert!(throttle.retry_after("a", t0() + Duration::minutes(9)).is_some());
        assert_eq!(throttle.retry_after("a", t0() + Duration::minutes(10)), None);
    }

    #[test]
    fn test_throttle_forgets_identities_that_never_return() {
        let mut throttle = LoginThrottle::new(3, 10);
        for i in 0..THROTTLE_SWEEP_THRESHOLD {
            throttle.record_failure(&format!("10.1.{}.{}", i / 256, i % 256), t0());
        }
        throttle.record_failure("10.2.0.1", t0() + Duration::minutes(5));
        assert_eq!(throttle.failures.len(), THROTTLE_SWEEP_THRESHOLD + 1);

        throttle.record_failure("10.2.0.2", t0() + Duration::minutes(11));
        assert_eq!(throttle.failures.len(), 2);
        assert!(throttle.failures.contains_key("10.2.0.1"));
    }

    #[test]
    fn test_throttle_reset() {
        let mut throttle = LoginThrottle::new(1, 10);
        throttle.record_failure("a", t0());
        throttle.reset("a");
        assert_eq!(throttle.retry_after("a", t0()), None);
    }
}
