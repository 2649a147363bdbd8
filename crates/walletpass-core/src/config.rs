//! Configuration resolution for `WalletPass`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (explicit path, else ~/.config/walletpass/settings.json)
//! 3. Environment variables (`WALLETPASS_*`)
//! 4. CLI arguments (applied by the binary, highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bundle::PassDefaults;
use crate::error::{Error, Result};

/// Complete `WalletPass` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pass: PassConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Identifiers stamped into every issued `pass.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PassConfig {
    pub pass_type_identifier: Option<String>,
    pub team_identifier: Option<String>,
    pub web_service_url: Option<String>,
}

impl PassConfig {
    /// Builder defaults derived from this section.
    pub fn defaults(&self) -> PassDefaults {
        PassDefaults {
            pass_type_identifier: self.pass_type_identifier.clone(),
            team_identifier: self.team_identifier.clone(),
            web_service_url: self.web_service_url.clone(),
        }
    }
}

/// Where the pass signing material lives.
///
/// Either `certificate_path` + `key_path` (PEM) or `pkcs12_path` must be
/// set, together with `wwdr_certificate_path`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct SigningConfig {
    pub certificate_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub pkcs12_path: Option<PathBuf>,
    pub key_password: Option<String>,
    pub wwdr_certificate_path: Option<PathBuf>,
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("certificate_path", &self.certificate_path)
            .field("key_path", &self.key_path)
            .field("pkcs12_path", &self.pkcs12_path)
            .field("key_password", &self.key_password.as_ref().map(|_| "<redacted>"))
            .field("wwdr_certificate_path", &self.wwdr_certificate_path)
            .finish()
    }
}

/// Which push transport notifies devices about updated passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PushBackendKind {
    /// Apple Push Notification service with token-based auth.
    Apns,
    /// Log the push instead of sending it.
    #[default]
    Log,
}

impl std::str::FromStr for PushBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "apns" => Ok(Self::Apns),
            "log" => Ok(Self::Log),
            other => Err(Error::Config(format!("Unknown push backend: {other}"))),
        }
    }
}

/// Push notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushConfig {
    #[serde(default)]
    pub backend: PushBackendKind,
    /// Use the APNs development environment.
    #[serde(default)]
    pub sandbox: bool,
    /// `.p8` token signing key downloaded from the developer portal.
    pub auth_key_path: Option<PathBuf>,
    pub auth_key_id: Option<String>,
}

/// Persistence and artifact delivery.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
    /// When set, `GET /v1/passes/...` redirects to `<base>/<artifact name>`
    /// instead of streaming the bytes.
    pub redirect_base_url: Option<String>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; the global path is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => Config::default(),
        },
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// Get the default database path.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("walletpass.db"))
}

/// `~/.config/walletpass` on Linux, `~/Library/Application Support/walletpass`
/// on macOS.
fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("walletpass"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply `WALLETPASS_*` overrides read through `lookup`.
///
/// Unparseable values are ignored, as with the other layers.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("WALLETPASS_PASS_TYPE_ID") {
        config.pass.pass_type_identifier = Some(val);
    }
    if let Some(val) = lookup("WALLETPASS_TEAM_ID") {
        config.pass.team_identifier = Some(val);
    }
    if let Some(val) = lookup("WALLETPASS_SERVICE_URL") {
        config.pass.web_service_url = Some(val);
    }
    if let Some(val) = lookup("WALLETPASS_KEY_PASSWORD") {
        config.signing.key_password = Some(val);
    }
    if let Some(val) = lookup("WALLETPASS_DATABASE_PATH") {
        config.storage.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("WALLETPASS_REDIRECT_BASE_URL") {
        config.storage.redirect_base_url = Some(val);
    }
    if let Some(val) = lookup("WALLETPASS_PUSH_BACKEND") {
        if let Ok(kind) = val.parse() {
            config.push.backend = kind;
        }
    }
    if let Some(val) = lookup("WALLETPASS_PUSH_SANDBOX") {
        if let Ok(b) = val.parse() {
            config.push.sandbox = b;
        }
    }
    if let Some(val) = lookup("WALLETPASS_LOG_LEVEL") {
        config.server.log_level = val;
    }
}
