use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::auth::AdminCredentials;
use crate::coordinator::CoordinatorSettings;
use crate::server::ServerConfig;

/// Environment variable overriding `admin.username`
pub const ENV_ADMIN_USERNAME: &str = "ATTENDANCE_ADMIN_USERNAME";

/// Environment variable overriding `admin.secret`
pub const ENV_ADMIN_SECRET: &str = "ATTENDANCE_ADMIN_SECRET";

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub window: WindowDefaults,
    #[serde(default)]
    pub login: LoginPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Administrator credentials
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    #[serde(default = "default_username")]
    pub username: String,

    /// Plaintext secret; hashed at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Hex SHA-256 of the secret (see `attendance-window hash-secret`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_sha256: Option<String>,
}

/// Listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Where the snapshot lives
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Defaults to the platform data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
}

/// Default durations used when the admin omits a value
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowDefaults {
    #[serde(default = "default_start_minutes")]
    pub default_start_minutes: u32,

    #[serde(default = "default_extend_minutes")]
    pub default_extend_minutes: u32,
}

/// Failed-login lockout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginPolicy {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: usize,

    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_username() -> String {
    "admin".to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_connections() -> usize {
    64
}

fn default_start_minutes() -> u32 {
    30
}

fn default_extend_minutes() -> u32 {
    10
}

fn default_max_failed_attempts() -> usize {
    3
}

fn default_lockout_minutes() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            secret: None,
            secret_sha256: None,
        }
    }
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("secret_sha256", &self.secret_sha256.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self {
            default_start_minutes: default_start_minutes(),
            default_extend_minutes: default_extend_minutes(),
        }
    }
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout_minutes: default_lockout_minutes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML configuration string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    /// Load configuration from file, falling back to defaults if it is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply environment overrides, looking variables up through `lookup`
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(username) = lookup(ENV_ADMIN_USERNAME).filter(|v| !v.is_empty()) {
            self.admin.username = username;
        }
        if let Some(secret) = lookup(ENV_ADMIN_SECRET).filter(|v| !v.is_empty()) {
            self.admin.secret = Some(secret);
            self.admin.secret_sha256 = None;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.admin.username.trim().is_empty() {
            anyhow::bail!("admin.username must not be empty");
        }

        match (&self.admin.secret, &self.admin.secret_sha256) {
            (None, None) => anyhow::bail!(
                "No admin secret configured. Set admin.secret or admin.secret_sha256, or export {}",
                ENV_ADMIN_SECRET
            ),
            (Some(secret), _) if secret.is_empty() => {
                anyhow::bail!("admin.secret must not be empty")
            }
            (None, Some(hash)) => {
                if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                    anyhow::bail!("admin.secret_sha256 must be 64 hexadecimal characters");
                }
            }
            _ => {}
        }

        if self.server.max_connections == 0 {
            anyhow::bail!("server.max_connections must be greater than 0");
        }
        if self.window.default_start_minutes == 0 {
            anyhow::bail!("window.default_start_minutes must be greater than 0");
        }
        if self.window.default_extend_minutes == 0 {
            anyhow::bail!("window.default_extend_minutes must be greater than 0");
        }
        if self.login.max_failed_attempts == 0 {
            anyhow::bail!("login.max_failed_attempts must be greater than 0");
        }

        Ok(())
    }

    /// Build the admin credentials, consuming the plaintext secret
    pub fn credentials(&self) -> Result<AdminCredentials> {
        match (&self.admin.secret, &self.admin.secret_sha256) {
            (Some(secret), _) => Ok(AdminCredentials::new(&self.admin.username, secret)),
            (None, Some(hash)) => AdminCredentials::from_secret_hash(&self.admin.username, hash),
            (None, None) => anyhow::bail!("No admin secret configured"),
        }
    }

    /// Drop the plaintext secret once credentials have been built
    pub fn forget_secret(&mut self) {
        self.admin.secret = None;
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            default_start_minutes: self.window.default_start_minutes,
            default_extend_minutes: self.window.default_extend_minutes,
            max_failed_logins: self.login.max_failed_attempts,
            lockout_minutes: self.login.lockout_minutes,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.server.bind.clone(),
            max_connections: self.server.max_connections,
        }
    }

    /// Resolved state file location
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.storage.state_path {
            Some(path) => Ok(path.clone()),
            None => crate::state::default_state_path(),
        }
    }
}

/// Platform default location of the configuration file
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "attendance-window")
        .context("Could not determine a configuration directory for this platform")?;
    Ok(dirs.config_dir().join("attendance-window.toml"))
}

/// Example configuration written by `attendance-window init`
pub const EXAMPLE_CONFIG: &str = r#"# Attendance window configuration

[admin]
username = "admin"
# Prefer the hashed form: attendance-window hash-secret '<secret>'
# secret_sha256 = "..."
secret = "change-me"

[server]
bind = "0.0.0.0:8080"
max_connections = 64

[storage]
# state_path = "/var/lib/attendance-window/state.json"

[window]
default_start_minutes = 30
default_extend_minutes = 10

[login]
max_failed_attempts = 3
lockout_minutes = 10

[logging]
level = "info"
"#;
