//! Edge (CDN) token: `exp=<expiry>~acl=<acl>~hmac=<hex digest>`.
//!
//! Independent of clock-skew correction.

use crate::auth::crypto::{hmac_sha1_hex, CryptoError};

const FIELD_DELIMITER: char = '~';

#[derive(Debug, Clone)]
pub struct EdgeTokenSigner {
    key_hex: String,
    window_secs: i64,
    acl: String,
}

impl EdgeTokenSigner {
    pub fn new(key_hex: impl Into<String>, window_secs: i64, acl: impl Into<String>) -> Self {
        Self {
            key_hex: key_hex.into(),
            window_secs,
            acl: acl.into(),
        }
    }

    /// Token valid until `now + window`.
    pub fn generate(&self, now: i64) -> Result<String, CryptoError> {
        let signed = format!(
            "exp={}{FIELD_DELIMITER}acl={}",
            now + self.window_secs,
            self.acl
        );
        let digest = hmac_sha1_hex(&signed, &self.key_hex)?;
        Ok(format!("{signed}{FIELD_DELIMITER}hmac={digest}"))
    }
}
