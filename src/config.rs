//! Configuration management for the proxy.
//!
//! Configuration is set via environment variables:
//! - `RELAY_HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `RELAY_PORT` - Optional. Server port. Defaults to `8787`.
//! - `RELAY_PROXY_SECRET` - Optional. Static bearer token accepted on every
//!   tenant-scoped request regardless of the multi-tenant key store. If unset
//!   a random one is generated at boot (and logged once).
//! - `RELAY_DEFAULT_MODEL` - Optional. Model id assumed when an inbound
//!   request omits `model`. Defaults to `claude-sonnet-4-20250514`.
//! - `RELAY_GUARDRAIL_ENABLED` - Optional. `"true"`/`"false"`. Defaults to `true`.
//! - `RELAY_GUARDRAIL_KEY` - Optional. 64 hex chars (32 bytes) used as the
//!   process-wide guardrail HMAC/AES key. A random key is generated at boot
//!   if unset (anonymization is then only reversible within this process's
//!   lifetime).
//! - `RELAY_AUTO_SWITCH_ON_RATE_LIMIT` / `RELAY_AUTO_SWITCH_ON_ERROR` -
//!   Optional. `"true"`/`"false"`. Both default to `true`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Process-wide proxy configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Process-wide bearer secret. Always wins auth over tenant keys (§4.8 step 1).
    pub proxy_secret: String,
    /// Model id assumed when the inbound body omits `model`.
    pub default_model: String,
    /// Whether the guardrail pipeline runs on request/response bodies.
    pub guardrail_enabled: bool,
    /// 32-byte key used for guardrail HMAC/AES operations.
    pub guardrail_key: [u8; 32],
    /// Whether to fail over to the next candidate on a 429.
    pub auto_switch_on_rate_limit: bool,
    /// Whether to fail over to the next candidate on a 5xx/transport error.
    pub auto_switch_on_error: bool,
}

fn env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue(
                name.to_string(),
                other.to_string(),
            )),
        },
    }
}

impl Config {
    /// Load configuration from environment variables, applying defaults for
    /// everything optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = std::env::var("RELAY_PORT")
            .unwrap_or_else(|_| "8787".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("RELAY_PORT".to_string(), format!("{}", e)))?;

        let proxy_secret = std::env::var("RELAY_PROXY_SECRET")
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let default_model = std::env::var("RELAY_DEFAULT_MODEL")
            .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

        let guardrail_enabled = env_bool("RELAY_GUARDRAIL_ENABLED", true)?;

        let guardrail_key = match std::env::var("RELAY_GUARDRAIL_KEY") {
            Ok(hexkey) => {
                let bytes = hex::decode(hexkey.trim()).map_err(|e| {
                    ConfigError::InvalidValue("RELAY_GUARDRAIL_KEY".to_string(), format!("{}", e))
                })?;
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    ConfigError::InvalidValue(
                        "RELAY_GUARDRAIL_KEY".to_string(),
                        "expected 32 bytes (64 hex chars)".to_string(),
                    )
                })?;
                arr
            }
            Err(_) => {
                use rand::RngCore;
                let mut key = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };

        let auto_switch_on_rate_limit = env_bool("RELAY_AUTO_SWITCH_ON_RATE_LIMIT", true)?;
        let auto_switch_on_error = env_bool("RELAY_AUTO_SWITCH_ON_ERROR", true)?;

        Ok(Self {
            host,
            port,
            proxy_secret,
            default_model,
            guardrail_enabled,
            guardrail_key,
            auto_switch_on_rate_limit,
            auto_switch_on_error,
        })
    }

    /// Build a config with explicit values, useful for tests.
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            proxy_secret: "test-secret".to_string(),
            default_model: "claude-sonnet-4-20250514".to_string(),
            guardrail_enabled: true,
            guardrail_key: [7u8; 32],
            auto_switch_on_rate_limit: true,
            auto_switch_on_error: true,
        }
    }
}
