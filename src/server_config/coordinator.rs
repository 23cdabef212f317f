//! Coalesced configuration fetches.
//!
//! # Concurrency
//! - One storage load and one network round-trip may be outstanding at a
//!   time; callers arriving meanwhile join the waiting list and receive the
//!   leader's result
//! - The network fetch runs in its own task so that dropping the leading
//!   caller does not strand the other waiters
//! - The waiting lists are drained exactly once per fetch cycle
//! - Adoption holds one mutex across the canonical swap and the directory
//!   store, so the directory always belongs to the canonical generation;
//!   storage writes happen after it is released
//! - Storage never replaces a payload already in memory: every adoption and
//!   rotation writes through, so memory is at least as fresh

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use url::Url;

use crate::auth::{AuthScheme, AuthTokenGenerator, AUTH_HEADER};
use crate::codec::{JsonDecoder, ResponseDecoder};
use crate::config::loader::read_bundled;
use crate::config::ServerConfig;
use crate::endpoints::directory::EndpointDirectory;
use crate::endpoints::model::{Endpoints, Settings};
use crate::endpoints::url::trailing_slash;
use crate::observability::metrics;
use crate::resilience::controller::EndpointResolver;
use crate::server_config::canonical::CanonicalConfig;
use crate::storage::{KeyValueStore, ENDPOINTS_KEY, SETTINGS_KEY};
use crate::transport::{HttpRequest, Transport};

/// Skip-comparison sentinel for [`ServerConfigManager::check_burst_cache_if_needed`].
pub const SKIP_TIMESTAMP: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    FetchingFromStorage,
    FetchingFromNetwork,
}

/// Override for the Endpoints request URL and the auth type it is signed with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigRequestTarget {
    pub url: Option<String>,
    pub auth_type: Option<String>,
}

/// What one network fetch cycle produced. Every waiter of the cycle gets
/// the same value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkFetchResult {
    pub endpoints: Option<Endpoints>,
    pub settings: Option<Settings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeoLocation {
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Default)]
struct Waiters {
    storage: Vec<oneshot::Sender<bool>>,
    network: Vec<oneshot::Sender<NetworkFetchResult>>,
    storage_in_flight: bool,
    network_in_flight: bool,
}

struct Inner {
    server: ServerConfig,
    canonical: Arc<CanonicalConfig>,
    directory: ArcSwapOption<EndpointDirectory>,
    transport: Arc<dyn Transport>,
    tokens: Arc<AuthTokenGenerator>,
    default_headers: HeaderMap,
    waiters: Mutex<Waiters>,
    adopting: Mutex<()>,
}

/// Owns the canonical configuration and the current endpoint directory.
#[derive(Clone)]
pub struct ServerConfigManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ServerConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfigManager")
            .field("server_url", &self.inner.server.server_url)
            .field("state", &self.state())
            .finish()
    }
}

impl ServerConfigManager {
    pub fn new(
        server: ServerConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        tokens: Arc<AuthTokenGenerator>,
        default_headers: HeaderMap,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                server,
                canonical: Arc::new(CanonicalConfig::new(store)),
                directory: ArcSwapOption::empty(),
                transport,
                tokens,
                default_headers,
                waiters: Mutex::new(Waiters::default()),
                adopting: Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> FetchState {
        let waiters = self.inner.lock_waiters();
        if waiters.network_in_flight {
            FetchState::FetchingFromNetwork
        } else if waiters.storage_in_flight {
            FetchState::FetchingFromStorage
        } else {
            FetchState::Idle
        }
    }

    pub fn endpoints(&self) -> Option<Arc<Endpoints>> {
        self.inner.canonical.endpoints()
    }

    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.inner.canonical.settings()
    }

    /// Directory of the current Endpoints generation.
    pub fn directory(&self) -> Option<Arc<EndpointDirectory>> {
        self.inner.directory.load_full()
    }

    /// Auth scheme the current generation declares for `host`.
    pub fn auth_scheme_for(&self, host: &str) -> Option<AuthScheme> {
        self.endpoints().and_then(|e| e.auth_scheme_for(host))
    }

    pub fn image_url(&self, route_id: &str) -> Option<String> {
        self.directory().and_then(|d| d.image_url(route_id))
    }

    /// Load configuration from durable storage, falling back to the bundled
    /// payloads. Returns true if Endpoints are available afterwards.
    pub async fn fetch_from_storage(&self) -> bool {
        if self.inner.canonical.is_loaded() {
            return true;
        }

        let (tx, rx) = oneshot::channel();
        let lead = {
            let mut waiters = self.inner.lock_waiters();
            // A leader may have finished between the check above and here.
            if !waiters.storage_in_flight && self.inner.canonical.is_loaded() {
                return true;
            }
            waiters.storage.push(tx);
            !std::mem::replace(&mut waiters.storage_in_flight, true)
        };

        if lead {
            let loaded = self.inner.load_from_storage();
            let pending = {
                let mut waiters = self.inner.lock_waiters();
                waiters.storage_in_flight = false;
                std::mem::take(&mut waiters.storage)
            };
            for waiter in pending {
                let _ = waiter.send(loaded);
            }
        }

        rx.await.unwrap_or(false)
    }

    /// Fetch Endpoints and/or Settings from the config server. With
    /// `persist`, results are adopted and written through to storage.
    pub async fn fetch_from_network(
        &self,
        include_endpoints: bool,
        include_settings: bool,
        target: Option<ConfigRequestTarget>,
        persist: bool,
    ) -> NetworkFetchResult {
        let (tx, rx) = oneshot::channel();
        let lead = {
            let mut waiters = self.inner.lock_waiters();
            waiters.network.push(tx);
            !std::mem::replace(&mut waiters.network_in_flight, true)
        };

        if lead {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let result = inner
                    .fetch_network_payloads(include_endpoints, include_settings, target.as_ref())
                    .await;
                if persist {
                    inner.adopt(&result);
                }
                let pending = {
                    let mut waiters = inner.lock_waiters();
                    waiters.network_in_flight = false;
                    std::mem::take(&mut waiters.network)
                };
                for waiter in pending {
                    let _ = waiter.send(result.clone());
                }
            });
        } else {
            tracing::debug!("Joining in-flight network config fetch");
        }

        rx.await.unwrap_or_default()
    }

    /// Refresh the stale pieces after comparing the loaded generation's
    /// timestamps with the caller's. `SKIP_TIMESTAMP` skips a comparison.
    /// Returns true iff every requested piece was fetched.
    pub async fn check_burst_cache_if_needed(
        &self,
        last_endpoints_updated: Option<i64>,
        last_settings_updated: Option<i64>,
        target: Option<ConfigRequestTarget>,
    ) -> bool {
        if !self.fetch_from_storage().await {
            tracing::warn!("No stored configuration, skipping burst cache check");
            return false;
        }

        let loaded_endpoints = self.endpoints().map(|e| e.last_updated_time).unwrap_or(0);
        let loaded_settings = self.settings().map(|s| s.last_update_time).unwrap_or(0);
        let include_endpoints = is_stale(last_endpoints_updated, loaded_endpoints);
        let include_settings = is_stale(last_settings_updated, loaded_settings);

        tracing::info!(include_endpoints, include_settings, "Checking burst cache");

        let result = self
            .fetch_from_network(include_endpoints, include_settings, target, false)
            .await;
        self.inner.adopt(&result);

        (!include_endpoints || result.endpoints.is_some())
            && (!include_settings || result.settings.is_some())
    }

    /// Drop the learned skew and force an Endpoints refresh.
    pub async fn burst_cache(&self) -> bool {
        self.inner.tokens.skew().reset();
        let result = self.fetch_from_network(true, false, None, false).await;
        let fetched = result.endpoints.is_some();
        self.inner.adopt(&NetworkFetchResult {
            endpoints: result.endpoints,
            settings: None,
        });
        fetched
    }

    /// Country and city of the device, as seen by the config server.
    pub async fn fetch_geo_location(&self) -> Option<GeoLocation> {
        let url = Url::parse(&format!("{}geo-location", trailing_slash(&self.inner.server.server_url)))
            .ok()?;
        let mut request = HttpRequest::get(url);
        request.headers = self.inner.config_headers(&request.url, None);

        let response = match self.inner.transport.perform(request).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::warn!(status = response.status, "Geo location request failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Geo location request failed");
                return None;
            }
        };

        let location: GeoLocation = serde_json::from_slice(&response.body).ok()?;
        if location.country.is_empty() {
            return None;
        }
        Some(location)
    }
}

/// Stale unless the caller passed the skip sentinel or the same timestamp.
fn is_stale(caller: Option<i64>, loaded: i64) -> bool {
    match caller {
        Some(SKIP_TIMESTAMP) => false,
        Some(ts) => ts != loaded,
        None => true,
    }
}

impl Inner {
    fn lock_waiters(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_adopting(&self) -> MutexGuard<'_, ()> {
        self.adopting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read both payloads from storage or bundled defaults and adopt what
    /// parses and is not already in memory. Returns true if Endpoints are
    /// loaded afterwards.
    fn load_from_storage(&self) -> bool {
        let store = self.canonical.store();

        let endpoints = stored_or_bundled(store.as_ref(), ENDPOINTS_KEY, self.server.bundled_endpoints_path.as_deref())
            .and_then(|raw| match Endpoints::from_json(&raw) {
                Ok(e) if !e.is_empty() => Some(e),
                Ok(_) => {
                    tracing::warn!("Stored endpoints are empty");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse stored endpoints");
                    None
                }
            });

        let settings = stored_or_bundled(store.as_ref(), SETTINGS_KEY, self.server.bundled_settings_path.as_deref())
            .and_then(|raw| match Settings::from_json(&raw) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse stored settings");
                    None
                }
            });

        let loaded = {
            let _adopting = self.lock_adopting();
            if let Some(settings) = settings {
                if self.canonical.settings().is_none() {
                    self.canonical.adopt_settings(settings, false);
                }
            }
            match endpoints {
                Some(endpoints) if self.canonical.endpoints().is_none() => {
                    self.install_endpoints(endpoints);
                }
                Some(_) => tracing::debug!("Keeping in-memory endpoints over the stored copy"),
                None => {}
            }
            self.canonical.endpoints().is_some()
        };

        metrics::record_config_fetch("storage", if loaded { "success" } else { "empty" });
        tracing::info!(loaded, "Loaded configuration from storage");
        loaded
    }

    async fn fetch_network_payloads(
        &self,
        include_endpoints: bool,
        include_settings: bool,
        target: Option<&ConfigRequestTarget>,
    ) -> NetworkFetchResult {
        if !include_endpoints && !include_settings {
            return NetworkFetchResult::default();
        }

        let endpoints_fut = async {
            if !include_endpoints {
                return None;
            }
            let endpoints: Endpoints = self.fetch_payload("endpoints", target).await?;
            if endpoints.is_empty() {
                tracing::warn!("Received empty endpoints from network");
                return None;
            }
            Some(endpoints)
        };
        let settings_fut = async {
            if !include_settings {
                return None;
            }
            let settings: Settings = self.fetch_payload("settings", None).await?;
            if settings.is_empty() {
                tracing::warn!("Received empty settings from network");
                return None;
            }
            Some(settings)
        };

        let (endpoints, settings) = futures_util::join!(endpoints_fut, settings_fut);
        NetworkFetchResult { endpoints, settings }
    }

    /// GET one config payload and decode it. Any failure yields `None`.
    async fn fetch_payload<T>(&self, resource: &str, target: Option<&ConfigRequestTarget>) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.config_url(resource, target)?;
        let auth = target
            .and_then(|t| t.auth_type.as_deref())
            .filter(|a| !a.is_empty())
            .map(AuthScheme::parse);

        let mut request = HttpRequest::get(url);
        request.headers = self.config_headers(&request.url, auth);
        tracing::debug!(url = %request.url, "Fetching config from network");

        let outcome = match self.transport.perform(request).await {
            Ok(response) if response.is_success() => {
                match JsonDecoder::<T>::new().decode(&response.body) {
                    Ok(payload) => Ok(payload),
                    Err(e) => Err(format!("decode failed: {e}")),
                }
            }
            Ok(response) => Err(format!("status {}", response.status)),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(payload) => {
                metrics::record_config_fetch("network", "success");
                Some(payload)
            }
            Err(reason) => {
                metrics::record_config_fetch("network", "failure");
                tracing::warn!(resource, reason = %reason, "Config fetch failed");
                None
            }
        }
    }

    fn config_url(&self, resource: &str, target: Option<&ConfigRequestTarget>) -> Option<Url> {
        if let Some(url) = target.and_then(|t| t.url.as_deref()).filter(|u| !u.is_empty()) {
            if let Ok(parsed) = Url::parse(url) {
                return Some(parsed);
            }
            tracing::warn!(url, "Ignoring unparseable config URL override");
        }

        let raw = format!("{}{resource}", trailing_slash(&self.server.server_url));
        match Url::parse(&raw) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::error!(url = %raw, error = %e, "Invalid config server URL");
                None
            }
        }
    }

    fn config_headers(&self, url: &Url, auth: Option<AuthScheme>) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = auth.and_then(|scheme| self.tokens.header_value(url, scheme)) {
            if let Ok(value) = HeaderValue::from_str(&token) {
                headers.insert(AUTH_HEADER, value);
            }
        }
        headers
    }

    /// Adopt whatever `result` carries, with write-through persistence.
    fn adopt(&self, result: &NetworkFetchResult) {
        if let Some(settings) = &result.settings {
            {
                let _adopting = self.lock_adopting();
                self.canonical.adopt_settings(settings.clone(), false);
            }
            self.canonical.persist_settings();
        }
        if let Some(endpoints) = &result.endpoints {
            self.adopt_endpoints(endpoints.clone());
        }
    }

    /// New Endpoints generation: replace canonical copy, rebuild the
    /// directory from scratch, then write through.
    fn adopt_endpoints(&self, endpoints: Endpoints) {
        {
            let _adopting = self.lock_adopting();
            self.install_endpoints(endpoints);
        }
        self.canonical.persist_endpoints();
    }

    /// Caller holds the adoption lock.
    fn install_endpoints(&self, endpoints: Endpoints) {
        let (endpoints, generation) = self.canonical.adopt_endpoints(endpoints);
        let directory = EndpointDirectory::from_endpoints(&endpoints, &self.server.http_scheme)
            .with_listener(self.canonical.listener(generation));

        tracing::info!(
            generation,
            hosts = directory.host_count(),
            modules = endpoints.modules.len(),
            "Adopted endpoints generation"
        );
        self.directory.store(Some(Arc::new(directory)));
    }
}

fn stored_or_bundled(store: &dyn KeyValueStore, key: &str, bundled: Option<&str>) -> Option<String> {
    if let Some(raw) = store.get(key).filter(|s| !s.trim().is_empty()) {
        return Some(raw);
    }
    match read_bundled(bundled) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to read bundled payload");
            None
        }
    }
}

#[async_trait]
impl EndpointResolver for ServerConfigManager {
    fn resolve(&self, module: &str) -> Option<String> {
        self.directory()?.resolve(module)
    }

    fn rotate_if_needed(&self, module: &str, previous_host: &str) -> bool {
        match self.directory() {
            Some(directory) => directory.rotate_if_needed(module, previous_host),
            None => false,
        }
    }

    fn host_count(&self) -> usize {
        self.directory().map(|d| d.host_count()).unwrap_or(0)
    }

    async fn ensure_loaded(&self) -> bool {
        if self.directory().is_some() {
            return true;
        }
        if self.fetch_from_storage().await && self.directory().is_some() {
            return true;
        }
        self.fetch_from_network(true, true, None, true).await;
        self.directory().is_some()
    }
}
