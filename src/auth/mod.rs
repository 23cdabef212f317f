//! Request Authentication Module
//!
//! # Responsibilities
//! - Produce the `Authentication` header value for a URL under the auth
//!   scheme its host declares
//! - Learn and persist the server/device clock skew from `Date` headers
//! - Decrypt the configured signing secret
//!
//! # Data Flow
//! ```text
//! Endpoints.auth[host] ──▶ AuthScheme
//!                              │
//!            ┌─────────────────┼──────────────────┐
//!            ▼                 ▼                  ▼
//!        CF / CB / AWS        AK             AWSC / Unknown
//!     HMAC-SHA256 token   edge token           no header
//!            ▲
//!            │ time = now - flex + skew
//!        ClockSkew ◀── 403 + Date header
//! ```
//!
//! # Design Decisions
//! - One skew value for every host and module, persisted on each change
//! - The clock is injected so token times are testable

pub mod clock;
pub mod crypto;
pub mod edge;
pub mod skew;
pub mod token;

use std::fmt;

pub use clock::{Clock, FixedClock, SystemClock};
pub use crypto::CryptoError;
pub use edge::EdgeTokenSigner;
pub use skew::{parse_http_date, ClockSkew};
pub use token::AuthTokenGenerator;

/// Header carrying the signed token.
pub const AUTH_HEADER: &str = "Authentication";

/// Signing scheme a host declares in the Endpoints payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    /// HMAC token over path and query.
    Cf,
    /// Same token as `Cf`.
    Cb,
    /// HMAC token over the fixed `/aws-authentication` path.
    Aws,
    /// Edge token: `exp=..~acl=..~hmac=..`.
    Akamai,
    /// Signed-cookie scheme; not supported, produces no header.
    Awsc,
    Unknown,
}

impl AuthScheme {
    /// Parse a declared auth type. Matching is case-insensitive.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "CF" => AuthScheme::Cf,
            "CB" => AuthScheme::Cb,
            "AWS" => AuthScheme::Aws,
            "AK" => AuthScheme::Akamai,
            "AWSC" => AuthScheme::Awsc,
            _ => AuthScheme::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Cf => "CF",
            AuthScheme::Cb => "CB",
            AuthScheme::Aws => "AWS",
            AuthScheme::Akamai => "AK",
            AuthScheme::Awsc => "AWSC",
            AuthScheme::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
