//! vax-config
//!
//! Daemon configuration: an optional YAML file layered under environment
//! variables (env wins). The effective config gets a stable SHA-256
//! fingerprint for startup logging, computed over a canonical JSON rendering
//! with secret fields redacted so the fingerprint can be logged safely.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

pub const ENV_BIND_ADDR: &str = "VAX_DAEMON_ADDR";
pub const ENV_DB_URL: &str = "VAX_DATABASE_URL";
pub const ENV_JWT_SECRET: &str = "VAX_JWT_SECRET";
pub const ENV_CONFIG_FILE: &str = "VAX_CONFIG_FILE";

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8899";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Socket address the daemon binds, e.g. "127.0.0.1:8899".
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Postgres connection string.
    #[serde(default)]
    pub database_url: Option<String>,

    /// HS256 signing secret for bearer tokens.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// When false the notification channel is a no-op (tests, local dev).
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: None,
            jwt_secret: None,
            notifications_enabled: true,
        }
    }
}

impl Config {
    /// Load from the optional YAML file named by VAX_CONFIG_FILE, then layer
    /// environment variables on top. Env always wins.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_CONFIG_FILE) {
            Ok(path) => Self::from_yaml_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(addr) = std::env::var(ENV_BIND_ADDR) {
            cfg.bind_addr = addr;
        }
        if let Ok(url) = std::env::var(ENV_DB_URL) {
            cfg.database_url = Some(url);
        }
        if let Ok(secret) = std::env::var(ENV_JWT_SECRET) {
            cfg.jwt_secret = Some(secret);
        }

        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Stable hex SHA-256 of the effective config, secrets redacted.
    ///
    /// Same inputs always produce the same fingerprint; changing any
    /// non-secret field changes it. Safe to log.
    pub fn fingerprint(&self) -> Result<String> {
        let mut value = serde_json::to_value(self).context("serialize config")?;
        if let Some(obj) = value.as_object_mut() {
            for key in ["database_url", "jwt_secret"] {
                if obj.get(key).map(|v| !v.is_null()).unwrap_or(false) {
                    obj.insert(key.to_string(), serde_json::Value::String("<set>".into()));
                }
            }
        }
        // serde_json object serialization is insertion-ordered; re-encode via
        // BTreeMap for key-order stability.
        let canonical: std::collections::BTreeMap<String, serde_json::Value> =
            serde_json::from_value(value).context("canonicalize config")?;
        let bytes = serde_json::to_vec(&canonical).context("encode canonical config")?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}
