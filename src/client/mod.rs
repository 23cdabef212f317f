//! API Client Module
//!
//! # Responsibilities
//! - Wire configuration, storage, transport, auth and the retry controller
//!   into one long-lived service object
//! - Run logical requests addressed by module name
//! - Decode successful bodies into caller models
//! - Expose cache bursting and module resolution to the host application
//!
//! # Data Flow
//! ```text
//! ApiRequest ──▶ ApiClient::execute ──▶ RequestRetryController
//!                                             │
//!                ServerConfigManager ◀────────┤ resolve / rotate
//!                HeaderBuilder       ◀────────┤ sign / correct skew
//!                Transport           ◀────────┘ send
//!                                             │
//!                     ResponseDecoder<T> ◀────┘ 2xx body
//! ```

pub mod error;
pub mod headers;
pub mod request;

use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

use crate::auth::{AuthScheme, AuthTokenGenerator, Clock, ClockSkew, CryptoError, SystemClock};
use crate::codec::{JsonDecoder, ResponseDecoder};
use crate::config::ClientConfig;
use crate::endpoints::model::{Endpoints, Settings};
use crate::resilience::{RequestHandle, RequestRetryController, RetryPolicy};
use crate::server_config::{ConfigRequestTarget, GeoLocation, ServerConfigManager};
use crate::storage::KeyValueStore;
use crate::transport::{HttpResponse, Transport};

pub use error::{ApiError, ApplicationError, ApplicationErrorCode};
pub use headers::{default_headers, AuthSchemeSource, HeaderBuilder};
pub use request::{ApiRequest, AuthRequirement};

/// Entry point for the host application.
#[derive(Clone)]
pub struct ApiClient {
    manager: ServerConfigManager,
    tokens: Arc<AuthTokenGenerator>,
    controller: Arc<RequestRetryController>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("manager", &self.manager)
            .field("policy", self.controller.policy())
            .finish()
    }
}

impl ApiClient {
    /// Build a client on the system clock.
    pub fn from_config(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, CryptoError> {
        Self::with_clock(config, transport, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CryptoError> {
        let skew = Arc::new(ClockSkew::load(store.clone()));
        let tokens = Arc::new(AuthTokenGenerator::from_config(&config.auth, skew, clock)?);
        let defaults = default_headers(&config.device, store.as_ref());

        let manager = ServerConfigManager::new(
            config.server.clone(),
            store,
            transport.clone(),
            tokens.clone(),
            defaults.clone(),
        );
        let signer = HeaderBuilder::new(defaults, tokens.clone(), Arc::new(manager.clone()));
        let controller = RequestRetryController::new(
            Arc::new(manager.clone()),
            Arc::new(signer),
            transport,
            RetryPolicy::from_config(&config.retries, &config.auth),
        );

        tracing::info!(
            server_url = %config.server.server_url,
            retries_enabled = config.retries.enabled,
            "API client initialized"
        );

        Ok(Self {
            manager,
            tokens,
            controller: Arc::new(controller),
        })
    }

    /// Load configuration from storage, falling back to the network.
    /// Returns true if Endpoints are available afterwards.
    pub async fn bootstrap(&self) -> bool {
        if self.manager.fetch_from_storage().await {
            return true;
        }
        tracing::info!("No stored configuration, fetching from network");
        self.manager
            .fetch_from_network(true, true, None, true)
            .await
            .endpoints
            .is_some()
    }

    /// Run a logical request and return the raw successful response.
    pub async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, ApiError> {
        self.controller.execute(request).await
    }

    /// Run a logical request and decode the body with `decoder`.
    pub async fn execute_decoded<T, D>(&self, request: &ApiRequest, decoder: &D) -> Result<T, ApiError>
    where
        D: ResponseDecoder<T> + ?Sized,
    {
        let response = self.execute(request).await?;
        Ok(decoder.decode(&response.body)?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        self.execute_decoded(request, &JsonDecoder::<T>::new()).await
    }

    /// Start a request in the background. `completion` runs once with the
    /// decoded model or the failure, and never after the handle is cancelled.
    pub fn perform<T, D, F>(&self, request: ApiRequest, decoder: D, completion: F) -> RequestHandle
    where
        T: Send + 'static,
        D: ResponseDecoder<T> + 'static,
        F: FnOnce(Result<T, ApiError>) + Send + 'static,
    {
        self.controller.perform(request, move |result| {
            let decoded = result.and_then(|response| Ok(decoder.decode(&response.body)?));
            completion(decoded);
        })
    }

    /// Reset the clock skew and refresh Endpoints from the network.
    pub async fn burst_cache(&self) -> bool {
        self.manager.burst_cache().await
    }

    pub async fn check_burst_cache_if_needed(
        &self,
        last_endpoints_updated: Option<i64>,
        last_settings_updated: Option<i64>,
        target: Option<ConfigRequestTarget>,
    ) -> bool {
        self.manager
            .check_burst_cache_if_needed(last_endpoints_updated, last_settings_updated, target)
            .await
    }

    pub async fn fetch_geo_location(&self) -> Option<GeoLocation> {
        self.manager.fetch_geo_location().await
    }

    /// Current base URL of a module.
    pub fn resolve(&self, module: &str) -> Option<String> {
        self.manager.directory()?.resolve(module)
    }

    pub fn module_path(&self, module: &str) -> Option<String> {
        self.manager.directory()?.module_path(module)
    }

    pub fn image_url(&self, route_id: &str) -> Option<String> {
        self.manager.image_url(route_id)
    }

    pub fn endpoints(&self) -> Option<Arc<Endpoints>> {
        self.manager.endpoints()
    }

    pub fn settings(&self) -> Option<Arc<Settings>> {
        self.manager.settings()
    }

    /// `Authentication` header value for `url` under `scheme`.
    pub fn sign(&self, url: &Url, scheme: AuthScheme) -> Option<String> {
        self.tokens.header_value(url, scheme)
    }

    pub fn server_config(&self) -> &ServerConfigManager {
        &self.manager
    }
}
