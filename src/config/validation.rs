//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, factors > 0)
//! - Check that encrypted secrets come with key material
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use thiserror::Error;
use url::Url;

use crate::config::schema::ClientConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.server_url is not a valid URL: {0:?}")]
    InvalidServerUrl(String),

    #[error("server.http_scheme must not be empty")]
    EmptyScheme,

    #[error("retries.rotation_factor must be at least 1")]
    ZeroRotationFactor,

    #[error("retries.base_delay_ms ({base}) exceeds retries.max_delay_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("auth.encrypted requires auth.cipher_key and a 16 byte auth.cipher_iv")]
    MissingCipherMaterial,

    #[error("auth.edge_key is not valid hex")]
    InvalidEdgeKey,
}

/// Run every semantic check against a parsed configuration.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if Url::parse(&config.server.server_url).is_err() {
        errors.push(ValidationError::InvalidServerUrl(config.server.server_url.clone()));
    }
    if config.server.http_scheme.trim().is_empty() {
        errors.push(ValidationError::EmptyScheme);
    }

    if config.retries.rotation_factor == 0 {
        errors.push(ValidationError::ZeroRotationFactor);
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base: config.retries.base_delay_ms,
            max: config.retries.max_delay_ms,
        });
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }

    if config.auth.encrypted
        && (config.auth.cipher_key.len() < 16 || config.auth.cipher_iv.len() != 16)
    {
        errors.push(ValidationError::MissingCipherMaterial);
    }
    // Encrypted edge keys are checked after decryption.
    if !config.auth.encrypted
        && !config.auth.edge_key.is_empty()
        && hex::decode(&config.auth.edge_key).is_err()
    {
        errors.push(ValidationError::InvalidEdgeKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
