//! ⚙️ Gateway Configuration
//!
//! Loads the full listener/auth/pool/session surface from an optional JSON
//! config file, then applies environment overrides. Every duration is
//! expressed in milliseconds on the wire and converted once here.

use crate::error::{GatewayError, GatewayResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 🔐 TLS listener settings; presence of this block enables wss
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    /// When set, client certificates are required and validated against this CA
    pub ca_path: Option<PathBuf>,
}

/// 🔑 Bearer-token gating
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub required: bool,
    pub secret_key: Option<String>,
}

/// 🧠 LSP pool tuning knobs
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Per-request timeout against the LSP child
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_restart_delay_ms() -> u64 {
    2_000
}
fn default_sweep_interval_ms() -> u64 {
    30_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            max_retries: default_max_retries(),
            restart_delay_ms: default_restart_delay_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// 👥 Session lifecycle knobs
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_reconnection_grace_ms")]
    pub reconnection_grace_ms: u64,
}

fn default_reconnection_grace_ms() -> u64 {
    60_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnection_grace_ms: default_reconnection_grace_ms(),
        }
    }
}

impl SessionConfig {
    pub fn reconnection_grace(&self) -> Duration {
        Duration::from_millis(self.reconnection_grace_ms)
    }
}

/// ⚙️ Top-level gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    pub max_clients: Option<usize>,
    /// Origin allowlist; `["*"]` or absence disables the check
    pub allowed_origins: Option<Vec<String>>,
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Extension → language tag overrides, merged over built-in defaults
    #[serde(default)]
    pub language_map: HashMap<String, String>,
}

fn default_port() -> u16 {
    7777
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_clients: None,
            allowed_origins: None,
            tls: None,
            auth: AuthConfig::default(),
            pool: PoolConfig::default(),
            session: SessionConfig::default(),
            language_map: HashMap::new(),
        }
    }
}

impl Config {
    /// 📋 Load from the optional config file path, then apply env overrides
    pub fn load(path: Option<&Path>) -> GatewayResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> GatewayResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| GatewayError::ConfigFileUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| GatewayError::ConfigValidation {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Environment overrides win over the config file
    fn apply_env(&mut self) {
        if let Some(port) = env::var("GATEWAY_PORT").ok().and_then(|s| s.parse().ok()) {
            self.port = port;
        }
        if let Some(max) = env::var("GATEWAY_MAX_CLIENTS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.max_clients = Some(max);
        }
        if let Ok(origins) = env::var("GATEWAY_ALLOWED_ORIGINS") {
            self.allowed_origins = Some(
                origins
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Ok(secret) = env::var("GATEWAY_AUTH_SECRET") {
            self.auth.required = true;
            self.auth.secret_key = Some(secret);
        }
        if let Some(ms) = env::var("GATEWAY_RECONNECT_GRACE_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.session.reconnection_grace_ms = ms;
        }
        if let Some(ms) = env::var("GATEWAY_POOL_IDLE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.pool.idle_timeout_ms = ms;
        }
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.auth.required && self.auth.secret_key.is_none() {
            return Err(GatewayError::config_validation(
                "auth.required is set but auth.secret_key is missing",
            ));
        }
        if let Some(tls) = &self.tls {
            if !tls.key_path.exists() {
                return Err(GatewayError::InvalidConfigValue {
                    field: "tls.key_path".into(),
                    value: tls.key_path.display().to_string(),
                });
            }
            if !tls.cert_path.exists() {
                return Err(GatewayError::InvalidConfigValue {
                    field: "tls.cert_path".into(),
                    value: tls.cert_path.display().to_string(),
                });
            }
        }
        if self.pool.max_retries == 0 {
            return Err(GatewayError::config_validation(
                "pool.max_retries must be at least 1",
            ));
        }
        Ok(())
    }

    /// Whether the given Origin header value is acceptable
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match &self.allowed_origins {
            None => true,
            Some(list) if list.iter().any(|o| o == "*") => true,
            Some(list) => match origin {
                // Missing origin header is rejected once an allowlist is set
                None => false,
                Some(o) => list.iter().any(|allowed| allowed == o),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 7777);
        assert_eq!(config.pool.max_retries, 3);
        assert_eq!(config.pool.restart_delay_ms, 2_000);
        assert_eq!(config.session.reconnection_grace_ms, 60_000);
        assert!(config.max_clients.is_none());
    }

    #[test]
    fn test_parse_full_surface() {
        let raw = r#"{
            "port": 9001,
            "max_clients": 64,
            "allowed_origins": ["https://ide.example.com"],
            "auth": { "required": true, "secret_key": "s3cret" },
            "pool": { "idle_timeout_ms": 1000, "max_retries": 2, "restart_delay_ms": 100, "sweep_interval_ms": 250 },
            "session": { "reconnection_grace_ms": 30000 },
            "language_map": { "zig": "zig" }
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.max_clients, Some(64));
        assert_eq!(config.pool.max_retries, 2);
        assert_eq!(config.pool.sweep_interval_ms, 250);
        assert_eq!(config.session.reconnection_grace_ms, 30_000);
        assert_eq!(config.language_map.get("zig").unwrap(), "zig");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_requires_secret() {
        let mut config = Config::default();
        config.auth.required = true;
        assert!(config.validate().is_err());
        config.auth.secret_key = Some("k".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_origin_allowlist() {
        let mut config = Config::default();
        assert!(config.origin_allowed(None));
        assert!(config.origin_allowed(Some("https://anywhere")));

        config.allowed_origins = Some(vec!["https://ide.example.com".into()]);
        assert!(config.origin_allowed(Some("https://ide.example.com")));
        assert!(!config.origin_allowed(Some("https://evil.example.com")));
        assert!(!config.origin_allowed(None));

        config.allowed_origins = Some(vec!["*".into()]);
        assert!(config.origin_allowed(None));
    }
}
