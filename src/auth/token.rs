//! Signed `Authentication` header values.

use std::sync::Arc;
use url::Url;

use crate::auth::clock::Clock;
use crate::auth::crypto::{decrypt_secret, hmac_sha256_base64, CryptoError};
use crate::auth::edge::EdgeTokenSigner;
use crate::auth::skew::ClockSkew;
use crate::auth::AuthScheme;
use crate::config::AuthConfig;
use crate::endpoints::url::path_and_query;

/// Path signed by the AWS scheme instead of the request path.
pub const AWS_AUTH_PATH: &str = "/aws-authentication";

/// Builds token header values; the only state is the shared skew.
pub struct AuthTokenGenerator {
    secret: String,
    flex_window_secs: i64,
    edge: EdgeTokenSigner,
    skew: Arc<ClockSkew>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuthTokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokenGenerator")
            .field("flex_window_secs", &self.flex_window_secs)
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

impl AuthTokenGenerator {
    /// Build from configuration, decrypting the secret if it is stored
    /// encrypted.
    pub fn from_config(
        auth: &AuthConfig,
        skew: Arc<ClockSkew>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CryptoError> {
        let secret = if auth.encrypted {
            decrypt_secret(&auth.secret, &auth.cipher_key, &auth.cipher_iv, auth.key_mode)?
        } else {
            auth.secret.clone()
        };

        Ok(Self {
            secret,
            flex_window_secs: auth.flex_window_secs,
            edge: EdgeTokenSigner::new(&auth.edge_key, auth.edge_window_secs, &auth.edge_acl),
            skew,
            clock,
        })
    }

    pub fn skew(&self) -> &Arc<ClockSkew> {
        &self.skew
    }

    /// Time embedded in HMAC tokens: `now - flex + skew`.
    pub fn signing_time(&self) -> i64 {
        self.clock.now_epoch_secs() - self.flex_window_secs + self.skew.get()
    }

    /// `<time>-<base64 HMAC-SHA256(uri + time)>`.
    pub fn hmac_token(&self, uri: &str) -> Option<String> {
        let time = self.signing_time();
        let message = format!("{uri}{time}");
        match hmac_sha256_base64(&message, self.secret.as_bytes()) {
            Ok(digest) => Some(format!("{time}-{digest}")),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to sign request");
                None
            }
        }
    }

    /// Header value for `url` under `scheme`, or `None` if the scheme
    /// produces no header.
    pub fn header_value(&self, url: &Url, scheme: AuthScheme) -> Option<String> {
        match scheme {
            AuthScheme::Cf | AuthScheme::Cb => self.hmac_token(&path_and_query(url)),
            AuthScheme::Aws => self.hmac_token(AWS_AUTH_PATH),
            AuthScheme::Akamai => match self.edge.generate(self.clock.now_epoch_secs()) {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to build edge token");
                    None
                }
            },
            AuthScheme::Awsc | AuthScheme::Unknown => None,
        }
    }

    /// Learn the skew from a `Date` header using this generator's clock.
    pub fn learn_skew(&self, date_header: &str) -> Option<i64> {
        self.skew.learn(date_header, self.clock.as_ref())
    }
}
