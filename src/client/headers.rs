//! Outbound header assembly.
//!
//! # Responsibilities
//! - Build the device headers attached to every request
//! - Merge per-request headers over the defaults
//! - Add the `Authentication` header for the host's declared scheme
//! - Learn the clock skew from a 403 carrying a `Date` header

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, DATE};
use std::sync::Arc;
use url::Url;

use crate::auth::{AuthScheme, AuthTokenGenerator, AUTH_HEADER};
use crate::client::request::AuthRequirement;
use crate::config::DeviceConfig;
use crate::resilience::controller::RequestSigner;
use crate::server_config::ServerConfigManager;
use crate::storage::{KeyValueStore, USER_ID_KEY};
use crate::transport::HttpResponse;

pub const DEVICE_TZ_HEADER: &str = "x-device-tz";
pub const APP_VERSION_HEADER: &str = "x-app-version";
pub const DEVICE_LOCATION_HEADER: &str = "x-device-location";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Where the auth scheme of a host comes from.
pub trait AuthSchemeSource: Send + Sync {
    fn auth_scheme_for(&self, host: &str) -> Option<AuthScheme>;
}

impl AuthSchemeSource for ServerConfigManager {
    fn auth_scheme_for(&self, host: &str) -> Option<AuthScheme> {
        ServerConfigManager::auth_scheme_for(self, host)
    }
}

/// Device headers sent with every request, config and auth calls included.
pub fn default_headers(device: &DeviceConfig, store: &dyn KeyValueStore) -> HeaderMap {
    let time_zone = device
        .time_zone
        .clone()
        .unwrap_or_else(|| chrono::Local::now().format("%z").to_string());

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

    let values = [
        (DEVICE_TZ_HEADER, time_zone),
        (APP_VERSION_HEADER, device.app_version.clone()),
        (DEVICE_LOCATION_HEADER, device.location.clone()),
        (USER_ID_HEADER, user_id(device, store)),
    ];
    for (name, value) in values {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => tracing::warn!(header = name, "Skipping header with invalid value"),
        }
    }

    headers
}

/// Configured id, else the persisted one, else a fresh persisted uuid.
fn user_id(device: &DeviceConfig, store: &dyn KeyValueStore) -> String {
    if let Some(id) = device.user_id.as_ref().filter(|id| !id.is_empty()) {
        return id.clone();
    }
    if let Some(id) = store.get(USER_ID_KEY).filter(|id| !id.is_empty()) {
        return id;
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = store.set(USER_ID_KEY, &id) {
        tracing::warn!(error = %e, "Failed to persist user id");
    }
    tracing::info!(user_id = %id, "Generated device user id");
    id
}

/// Signs requests for the retry controller.
pub struct HeaderBuilder {
    defaults: HeaderMap,
    tokens: Arc<AuthTokenGenerator>,
    schemes: Arc<dyn AuthSchemeSource>,
}

impl HeaderBuilder {
    pub fn new(
        defaults: HeaderMap,
        tokens: Arc<AuthTokenGenerator>,
        schemes: Arc<dyn AuthSchemeSource>,
    ) -> Self {
        Self {
            defaults,
            tokens,
            schemes,
        }
    }

    pub fn defaults(&self) -> &HeaderMap {
        &self.defaults
    }

    fn auth_value(&self, url: &Url) -> Option<HeaderValue> {
        let host = url.host_str()?;
        let scheme = self.schemes.auth_scheme_for(host)?;
        let token = self.tokens.header_value(url, scheme)?;
        HeaderValue::from_str(&token).ok()
    }
}

impl RequestSigner for HeaderBuilder {
    fn headers_for(&self, url: &Url, auth: AuthRequirement, extra: &HeaderMap) -> HeaderMap {
        let mut headers = self.defaults.clone();
        for (name, value) in extra {
            headers.insert(name.clone(), value.clone());
        }

        if auth == AuthRequirement::Required {
            if let Some(value) = self.auth_value(url) {
                headers.insert(AUTH_HEADER, value);
            }
        }
        headers
    }

    fn correct_skew(&self, response: &HttpResponse) -> bool {
        if response.status != 403 {
            return false;
        }
        match response.headers.get(DATE).and_then(|v| v.to_str().ok()) {
            Some(date) => self.tokens.learn_skew(date).is_some(),
            None => false,
        }
    }
}
