use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Environment variable that overrides `security.encryptionKey`.
pub const ENCRYPTION_KEY_ENV: &str = "WECOM_RELAY_ENCRYPTION_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Bearer token for the `/api/messages` and `/api/notify` routes. Callback routes stay public.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    18790
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            api_token: None,
            allowed_origins: vec![],
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// SQLite file. Empty = `~/.wecom-relay/data/relay.db`.
    #[serde(default)]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Process-wide password protecting corpsecrets and EncodingAESKeys at rest.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

/// 企业微信 outbound API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeComConfig {
    #[serde(default = "default_wecom_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Sustained outbound message rate (message API limit is ~20/s per app).
    #[serde(default = "default_send_rate_per_sec")]
    pub send_rate_per_sec: u32,
    /// Look up sender display names via `user/get` while storing callbacks.
    #[serde(default)]
    pub resolve_sender_names: bool,
}

fn default_wecom_api_base() -> String {
    "https://qyapi.weixin.qq.com/cgi-bin".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_send_rate_per_sec() -> u32 {
    20
}

impl Default for WeComConfig {
    fn default() -> Self {
        Self {
            api_base: default_wecom_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
            send_rate_per_sec: default_send_rate_per_sec(),
            resolve_sender_names: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesConfig {
    /// IANA zone used for the display timestamp and date bucket of stored messages.
    #[serde(default = "default_display_timezone")]
    pub display_timezone: String,
}

fn default_display_timezone() -> String {
    "Asia/Shanghai".to_string()
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            display_timezone: default_display_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub wecom: WeComConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            debug!(path = %config_path.display(), "Loading config");
            Self::load(&config_path)
        } else {
            debug!(path = %config_path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn db_path(&self, paths: &Paths) -> PathBuf {
        match self.storage.db_path.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => paths.db_file(),
        }
    }

    /// Resolve the at-rest encryption password. Env wins over the config file.
    /// There is no fallback: a missing key is a startup error.
    pub fn encryption_key(&self) -> Result<String> {
        let from_env = std::env::var(ENCRYPTION_KEY_ENV).ok();
        self.resolve_encryption_key(from_env)
    }

    fn resolve_encryption_key(&self, from_env: Option<String>) -> Result<String> {
        let candidate = from_env
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.security
                    .encryption_key
                    .clone()
                    .filter(|k| !k.trim().is_empty())
            });
        candidate.ok_or_else(|| {
            Error::Config(format!(
                "encryption key is not configured; set {} or security.encryptionKey",
                ENCRYPTION_KEY_ENV
            ))
        })
    }

    pub fn display_timezone(&self) -> Result<chrono_tz::Tz> {
        self.messages
            .display_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| {
                Error::Config(format!(
                    "invalid messages.displayTimezone '{}': {}",
                    self.messages.display_timezone, e
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.gateway.port, 18790);
        assert_eq!(cfg.wecom.api_base, "https://qyapi.weixin.qq.com/cgi-bin");
        assert!(!cfg.wecom.resolve_sender_names);
        assert_eq!(cfg.display_timezone().unwrap(), chrono_tz::Asia::Shanghai);
    }

    #[test]
    fn test_camel_case_keys() {
        let raw = r#"{
  "gateway": { "port": 9000, "apiToken": "t" },
  "security": { "encryptionKey": "pw" },
  "wecom": { "resolveSenderNames": true },
  "messages": { "displayTimezone": "UTC" }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.api_token.as_deref(), Some("t"));
        assert!(cfg.wecom.resolve_sender_names);
        assert_eq!(cfg.display_timezone().unwrap(), chrono_tz::UTC);
        assert_eq!(cfg.resolve_encryption_key(None).unwrap(), "pw");
    }

    #[test]
    fn test_encryption_key_env_overrides_file() {
        let mut cfg = Config::default();
        cfg.security.encryption_key = Some("from-file".to_string());
        let key = cfg.resolve_encryption_key(Some("from-env".to_string())).unwrap();
        assert_eq!(key, "from-env");
    }

    #[test]
    fn test_missing_encryption_key_is_error() {
        let cfg = Config::default();
        assert!(matches!(cfg.resolve_encryption_key(None), Err(Error::Config(_))));
        assert!(cfg.resolve_encryption_key(Some("  ".to_string())).is_err());
    }

    #[test]
    fn test_invalid_timezone() {
        let mut cfg = Config::default();
        cfg.messages.display_timezone = "Mars/Olympus".to_string();
        assert!(cfg.display_timezone().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let mut cfg = Config::default();
        cfg.gateway.port = 1234;
        cfg.save(&paths.config_file()).unwrap();
        let loaded = Config::load_or_default(&paths).unwrap();
        assert_eq!(loaded.gateway.port, 1234);
        assert_eq!(loaded.db_path(&paths), paths.db_file());
    }
}
