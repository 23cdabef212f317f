//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the API client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Configuration server and bundled fallback payloads.
    pub server: ServerConfig,

    /// Request signing settings.
    pub auth: AuthConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Device identity sent with every request.
    pub device: DeviceConfig,

    /// Durable storage settings.
    pub storage: StorageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Where remote configuration comes from.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the configuration service (`<url>/endpoints`, `<url>/settings`).
    pub server_url: String,

    /// Scheme substituted for the `{0}` placeholder in host templates.
    pub http_scheme: String,

    /// Path to the bundled Endpoints payload used when storage is empty.
    pub bundled_endpoints_path: Option<String>,

    /// Path to the bundled Settings payload used when storage is empty.
    pub bundled_settings_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_url: "https://config.example.com/".to_string(),
            http_scheme: "https".to_string(),
            bundled_endpoints_path: None,
            bundled_settings_path: None,
        }
    }
}

/// How the AES key is derived from the configured key material.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// First 16 bytes of the key material.
    #[default]
    Padded,
    /// First 16 bytes of SHA-1(key material).
    Sha,
}

/// Request signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for the path-token schemes. Base64 AES ciphertext when
    /// `encrypted` is set.
    pub secret: String,

    /// Whether `secret` and `edge_key` are AES-CBC encrypted.
    pub encrypted: bool,

    /// AES key material (only used when `encrypted`).
    pub cipher_key: String,

    /// AES IV, 16 bytes of UTF-8 (only used when `encrypted`).
    pub cipher_iv: String,

    /// AES key derivation mode.
    pub key_mode: KeyMode,

    /// Hex-encoded key for edge (ACL) tokens.
    pub edge_key: String,

    /// Seconds subtracted from the signing time to tolerate clock drift.
    pub flex_window_secs: i64,

    /// Lifetime of an edge token in seconds.
    pub edge_window_secs: i64,

    /// ACL pattern embedded in edge tokens.
    pub edge_acl: String,

    /// Clock-skew corrections allowed per logical request.
    pub max_skew_corrections: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            encrypted: false,
            cipher_key: String::new(),
            cipher_iv: String::new(),
            key_mode: KeyMode::Padded,
            edge_key: String::new(),
            flex_window_secs: 10,
            edge_window_secs: 300,
            edge_acl: "/*".to_string(),
            max_skew_corrections: 3,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Retries allowed per logical request, as a multiple of the host count.
    pub rotation_factor: u32,

    /// HTTP statuses that are never retried.
    pub non_retryable_statuses: Vec<u16>,

    /// Application error codes (from JSON error bodies) that are never retried.
    pub non_retryable_error_codes: Vec<String>,

    /// Base delay for exponential backoff in milliseconds (0 = resubmit immediately).
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rotation_factor: 2,
            non_retryable_statuses: vec![304, 404, 417, 429],
            non_retryable_error_codes: vec![
                "14011".to_string(),
                "14013".to_string(),
                "14290".to_string(),
            ],
            base_delay_ms: 0,
            max_delay_ms: 2000,
        }
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Device identity attached to outbound requests.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DeviceConfig {
    /// Application version string.
    pub app_version: String,

    /// UTC offset like `+0530`. Derived from the local clock when unset.
    pub time_zone: Option<String>,

    /// Coarse location (country code).
    pub location: String,

    /// Stable user id. Generated and persisted when unset.
    pub user_id: Option<String>,
}

/// Durable storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file backing the key-value store. In-memory when unset.
    pub path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [server]
            server_url = "https://cfg.test/"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.server_url, "https://cfg.test/");
        assert_eq!(config.server.http_scheme, "https");
        assert_eq!(config.auth.flex_window_secs, 10);
        assert_eq!(config.retries.rotation_factor, 2);
        assert_eq!(config.retries.non_retryable_statuses, vec![304, 404, 417, 429]);
    }

    #[test]
    fn test_key_mode_parses_lowercase() {
        let config: ClientConfig = toml::from_str(
            r#"
            [auth]
            encrypted = true
            key_mode = "sha"
            "#,
        )
        .unwrap();
        assert_eq!(config.auth.key_mode, KeyMode::Sha);
    }
}
