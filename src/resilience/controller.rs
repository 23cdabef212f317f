//! Per-request retry loop.
//!
//! # State Machine
//! ```text
//! NotStarted ──▶ InFlight ──▶ Succeeded
//!                  ▲   │
//!                  │   ├────▶ Failed
//!                  │   │
//!             Retrying ◀┘     Cancelled (from any non-terminal state)
//! ```
//!
//! # Failure handling, in order
//! 1. cancelled                       → Cancelled, no completion
//! 2. offline                         → Failed (Connectivity)
//! 3. status or app code vetoed       → Failed (NonRetryable)
//! 4. rotate host and/or correct skew → retry if either changed something
//! 5. retries >= factor × host count  → Failed regardless of step 4

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::client::error::{ApiError, ApplicationError};
use crate::client::request::{ApiRequest, AuthRequirement};
use crate::endpoints::url::authority;
use crate::observability::metrics;
use crate::resilience::retries::RetryPolicy;
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Module → URL resolution and failover, as seen by the retry loop.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Current base URL of a module.
    fn resolve(&self, module: &str) -> Option<String>;

    /// Rotation decision after a failed attempt against `previous_host`.
    fn rotate_if_needed(&self, module: &str, previous_host: &str) -> bool;

    fn host_count(&self) -> usize;

    /// Load configuration if none is loaded yet. Returns true if some
    /// configuration is available afterwards.
    async fn ensure_loaded(&self) -> bool;
}

/// Header construction and clock-skew repair.
pub trait RequestSigner: Send + Sync {
    /// Default headers, `extra`, and the auth header when required.
    fn headers_for(&self, url: &Url, auth: AuthRequirement, extra: &HeaderMap) -> HeaderMap;

    /// Learn the skew from a 403 response. Returns true if a new value was
    /// adopted and a resubmission may now succeed.
    fn correct_skew(&self, response: &HttpResponse) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    NotStarted,
    InFlight,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Succeeded | RequestState::Failed | RequestState::Cancelled
        )
    }
}

/// Handle to a request started with [`RequestRetryController::perform`].
#[derive(Debug, Clone)]
pub struct RequestHandle {
    cancel: CancellationToken,
    state: watch::Receiver<RequestState>,
}

impl RequestHandle {
    /// Detach from the request. The completion callback will not run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> RequestState {
        *self.state.borrow()
    }

    /// Wait until the request reaches a terminal state.
    pub async fn finished(&mut self) -> RequestState {
        if let Ok(state) = self.state.wait_for(RequestState::is_terminal).await {
            return *state;
        }
        *self.state.borrow()
    }
}

/// Outcome of one attempt that did not succeed.
enum Failure {
    Transport(TransportError),
    Status(HttpResponse),
}

impl Failure {
    fn into_error(self) -> ApiError {
        match self {
            Failure::Transport(TransportError::Offline) => ApiError::Connectivity,
            Failure::Transport(e) => ApiError::TransientServer {
                status: None,
                detail: e.to_string(),
            },
            Failure::Status(response) => {
                let app = ApplicationError::from_body(response.status, &response.body);
                ApiError::TransientServer {
                    status: Some(response.status),
                    detail: app
                        .message
                        .unwrap_or_else(|| String::from_utf8_lossy(&response.body).into_owned()),
                }
            }
        }
    }
}

pub struct RequestRetryController {
    resolver: Arc<dyn EndpointResolver>,
    signer: Arc<dyn RequestSigner>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RequestRetryController {
    pub fn new(
        resolver: Arc<dyn EndpointResolver>,
        signer: Arc<dyn RequestSigner>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            signer,
            transport,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a logical request to completion.
    pub async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, ApiError> {
        let (state, _) = watch::channel(RequestState::NotStarted);
        self.execute_with(request, &CancellationToken::new(), &state).await
    }

    /// Run a logical request, publishing state transitions and honoring
    /// `cancel` at every suspension point.
    pub async fn execute_with(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
        state: &watch::Sender<RequestState>,
    ) -> Result<HttpResponse, ApiError> {
        let (terminal, result) = self.run_to_completion(request, cancel, state).await;
        state.send_replace(terminal);
        result
    }

    /// Run the retry loop and classify its outcome without publishing the
    /// terminal state.
    async fn run_to_completion(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
        state: &watch::Sender<RequestState>,
    ) -> (RequestState, Result<HttpResponse, ApiError>) {
        let start = Instant::now();
        let span = tracing::info_span!(
            "api_request",
            request_id = %uuid::Uuid::new_v4(),
            module = %request.module,
            method = %request.method,
        );

        let result = self.run(request, cancel, state).instrument(span).await;

        let cancelled = cancel.is_cancelled() || matches!(result, Err(ApiError::Cancelled));
        let (terminal, outcome, result) = if cancelled {
            (RequestState::Cancelled, "cancelled", Err(ApiError::Cancelled))
        } else if result.is_ok() {
            (RequestState::Succeeded, "success", result)
        } else {
            (RequestState::Failed, "failure", result)
        };

        metrics::record_request(&request.module, outcome, start);
        (terminal, result)
    }

    /// Start a request in the background. `callback` runs exactly once on
    /// success or failure and never after cancellation. The terminal state
    /// is published once, after the last cancellation check.
    pub fn perform<F>(self: &Arc<Self>, request: ApiRequest, callback: F) -> RequestHandle
    where
        F: FnOnce(Result<HttpResponse, ApiError>) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(RequestState::NotStarted);
        let controller = Arc::clone(self);
        let token = cancel.clone();

        tokio::spawn(async move {
            let (terminal, result) = controller.run_to_completion(&request, &token, &state_tx).await;
            if token.is_cancelled() || terminal == RequestState::Cancelled {
                tracing::debug!(module = %request.module, "Request cancelled, dropping result");
                state_tx.send_replace(RequestState::Cancelled);
                return;
            }
            state_tx.send_replace(terminal);
            callback(result);
        });

        RequestHandle {
            cancel,
            state: state_rx,
        }
    }

    async fn run(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
        state: &watch::Sender<RequestState>,
    ) -> Result<HttpResponse, ApiError> {
        let mut retries: u32 = 0;
        let mut skew_corrections: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let base = self.resolve_base(&request.module, cancel).await?;
            let url = request
                .url_for(&base)
                .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
            let previous_host = authority(url.as_str()).unwrap_or_default();

            let attempt = HttpRequest {
                method: request.method.clone(),
                headers: self.signer.headers_for(&url, request.auth, &request.headers),
                url,
                body: request.body.clone(),
            };

            state.send_replace(RequestState::InFlight);
            tracing::debug!(attempt = retries + 1, host = %previous_host, "Sending request");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                outcome = self.transport.perform(attempt) => outcome,
            };

            let failure = match outcome {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => Failure::Status(response),
                Err(e) => Failure::Transport(e),
            };

            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            match &failure {
                Failure::Transport(e) if e.is_offline() => {
                    tracing::warn!("Device offline, not retrying");
                    return Err(ApiError::Connectivity);
                }
                Failure::Transport(e) => {
                    tracing::warn!(error = %e, host = %previous_host, "Attempt failed");
                }
                Failure::Status(response) => {
                    tracing::warn!(status = response.status, host = %previous_host, "Attempt failed");
                    if let Some(app) = self.policy.veto(response) {
                        tracing::info!(
                            status = app.status,
                            error_code = app.raw_code.as_deref().unwrap_or("none"),
                            "Failure is not retryable"
                        );
                        return Err(ApiError::NonRetryable(app));
                    }
                }
            }

            if !self.policy.enabled {
                return Err(failure.into_error());
            }

            let domain_changed = self
                .resolver
                .rotate_if_needed(&request.module, &previous_host);

            let header_changed = match &failure {
                Failure::Status(response)
                    if response.status == 403
                        && skew_corrections < self.policy.max_skew_corrections =>
                {
                    let corrected = self.signer.correct_skew(response);
                    if corrected {
                        skew_corrections += 1;
                    }
                    corrected
                }
                _ => false,
            };

            let max_retries = self.policy.max_retries(self.resolver.host_count());
            let should_retry = (domain_changed || header_changed) && retries < max_retries;

            if !should_retry {
                tracing::warn!(
                    retries,
                    max_retries,
                    domain_changed,
                    header_changed,
                    "Giving up on request"
                );
                return Err(failure.into_error());
            }

            retries += 1;
            state.send_replace(RequestState::Retrying);
            metrics::record_retry(
                &request.module,
                if header_changed { "clock_skew" } else { "host_rotation" },
            );
            tracing::info!(retry = retries, domain_changed, header_changed, "Retrying request");

            let delay = self.policy.delay_for(retries);
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Base URL for `module`, loading configuration first if needed.
    async fn resolve_base(
        &self,
        module: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ApiError> {
        if let Some(base) = self.resolver.resolve(module) {
            return Ok(base);
        }

        tracing::info!(module = %module, "No URL for module, loading configuration");
        tokio::select! {
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            _ = self.resolver.ensure_loaded() => {}
        }

        self.resolver
            .resolve(module)
            .ok_or_else(|| ApiError::ConfigUnavailable {
                module: module.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::model::{Endpoints, Module};
    use crate::endpoints::EndpointDirectory;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct DirectoryResolver {
        directory: EndpointDirectory,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl EndpointResolver for DirectoryResolver {
        fn resolve(&self, module: &str) -> Option<String> {
            self.directory.resolve(module)
        }

        fn rotate_if_needed(&self, module: &str, previous_host: &str) -> bool {
            self.directory.rotate_if_needed(module, previous_host)
        }

        fn host_count(&self) -> usize {
            self.directory.host_count()
        }

        async fn ensure_loaded(&self) -> bool {
            self.loads.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[derive(Default)]
    struct StubSigner {
        corrections: AtomicUsize,
    }

    impl RequestSigner for StubSigner {
        fn headers_for(&self, _url: &Url, _auth: AuthRequirement, extra: &HeaderMap) -> HeaderMap {
            extra.clone()
        }

        fn correct_skew(&self, response: &HttpResponse) -> bool {
            self.corrections.fetch_add(1, Ordering::SeqCst);
            response.header("date").is_some()
        }
    }

    /// Replays scripted outcomes and records the hosts it was sent to.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        fallback: Option<u16>,
        hosts: Mutex<Vec<String>>,
        delay: Option<Duration>,
        /// Cancelled once the delay elapsed, just before the response returns.
        cancel_on_send: Mutex<Option<RequestHandle>>,
    }

    impl ScriptedTransport {
        fn always(status: u16) -> Self {
            Self {
                fallback: Some(status),
                ..Default::default()
            }
        }

        fn scripted(items: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(items.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.hosts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.hosts
                .lock()
                .unwrap()
                .push(request.url.host_str().unwrap_or_default().to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(handle) = self.cancel_on_send.lock().unwrap().as_ref() {
                handle.cancel();
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(outcome) => outcome,
                None => Ok(HttpResponse::new(self.fallback.unwrap_or(200), "{}")),
            }
        }
    }

    fn resolver(hosts: usize) -> Arc<DirectoryResolver> {
        let endpoints = Endpoints {
            app_urls: (0..hosts).map(|i| format!("{{0}}://h{i}.test/")).collect(),
            modules: vec![Module {
                name: "videos".into(),
                uri: "videos".into(),
                version: "v1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        Arc::new(DirectoryResolver {
            directory: EndpointDirectory::from_endpoints(&endpoints, "https"),
            loads: AtomicUsize::new(0),
        })
    }

    fn controller(
        resolver: Arc<DirectoryResolver>,
        signer: Arc<StubSigner>,
        transport: Arc<ScriptedTransport>,
    ) -> Arc<RequestRetryController> {
        Arc::new(RequestRetryController::new(
            resolver,
            signer,
            transport,
            RetryPolicy::default(),
        ))
    }

    fn forbidden_with_date() -> HttpResponse {
        let mut response = HttpResponse::new(403, "");
        response
            .headers
            .insert("date", "Sun, 06 Nov 1994 08:49:37 GMT".parse().unwrap());
        response
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let transport = Arc::new(ScriptedTransport::always(200));
        let ctrl = controller(resolver(2), Arc::default(), transport.clone());
        let response = ctrl.execute(&ApiRequest::get("videos", "index")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_rotates_to_next_host() {
        let transport = Arc::new(ScriptedTransport::scripted(vec![Ok(HttpResponse::new(503, ""))]));
        let res = resolver(3);
        let ctrl = controller(res.clone(), Arc::default(), transport.clone());

        ctrl.execute(&ApiRequest::get("videos", "index")).await.unwrap();
        assert_eq!(*transport.hosts.lock().unwrap(), vec!["h0.test", "h1.test"]);
        assert_eq!(res.directory.module("videos").unwrap().in_use, 1);
    }

    #[tokio::test]
    async fn test_retry_bound_with_three_hosts() {
        let transport = Arc::new(ScriptedTransport::always(500));
        let ctrl = controller(resolver(3), Arc::default(), transport.clone());

        let err = ctrl.execute(&ApiRequest::get("videos", "index")).await.unwrap_err();
        assert!(matches!(err, ApiError::TransientServer { status: Some(500), .. }));
        // One initial attempt plus at most 2 × 3 retries.
        assert_eq!(transport.calls(), 7);
    }

    #[tokio::test]
    async fn test_offline_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::scripted(vec![Err(TransportError::Offline)]));
        let ctrl = controller(resolver(3), Arc::default(), transport.clone());

        let err = ctrl.execute(&ApiRequest::get("videos", "index")).await.unwrap_err();
        assert!(matches!(err, ApiError::Connectivity));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_status_and_code() {
        for outcome in [
            HttpResponse::new(429, ""),
            HttpResponse::new(500, r#"{"errorCode":"14013","message":"bad otp"}"#),
        ] {
            let transport = Arc::new(ScriptedTransport::scripted(vec![Ok(outcome)]));
            let ctrl = controller(resolver(3), Arc::default(), transport.clone());
            let err = ctrl.execute(&ApiRequest::get("videos", "x")).await.unwrap_err();
            assert!(matches!(err, ApiError::NonRetryable(_)));
            assert_eq!(transport.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_skew_corrections_are_capped() {
        let transport = Arc::new(ScriptedTransport::scripted(
            (0..10).map(|_| Ok(forbidden_with_date())).collect(),
        ));
        let signer = Arc::new(StubSigner::default());
        let ctrl = controller(resolver(3), signer.clone(), transport.clone());

        let err = ctrl.execute(&ApiRequest::get("videos", "x")).await.unwrap_err();
        assert!(matches!(err, ApiError::TransientServer { status: Some(403), .. }));
        assert_eq!(signer.corrections.load(Ordering::SeqCst), 3);
        assert_eq!(transport.calls(), 7);
    }

    #[tokio::test]
    async fn test_skew_correction_alone_allows_retry() {
        // A single host with an exhausted budget still retries once the
        // skew has been corrected.
        let transport = Arc::new(ScriptedTransport::scripted(vec![Ok(forbidden_with_date())]));
        let res = resolver(1);
        for _ in 0..2 {
            res.directory.rotate_if_needed("videos", "h0.test");
        }
        assert_eq!(res.directory.module("videos").unwrap().max_fails, 0);

        let signer = Arc::new(StubSigner::default());
        let ctrl = controller(res, signer.clone(), transport.clone());
        let response = ctrl.execute(&ApiRequest::get("videos", "x")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_config_unavailable() {
        let transport = Arc::new(ScriptedTransport::always(200));
        let res = resolver(2);
        let ctrl = controller(res.clone(), Arc::default(), transport.clone());

        let err = ctrl.execute(&ApiRequest::get("iam", "login")).await.unwrap_err();
        assert!(matches!(err, ApiError::ConfigUnavailable { .. }));
        assert_eq!(res.loads.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_perform_invokes_callback_once() {
        let transport = Arc::new(ScriptedTransport::always(200));
        let ctrl = controller(resolver(2), Arc::default(), transport);
        let (tx, rx) = tokio::sync::oneshot::channel();

        let mut handle = ctrl.perform(ApiRequest::get("videos", "x"), move |result| {
            let _ = tx.send(result.map(|r| r.status));
        });

        assert_eq!(rx.await.unwrap().unwrap(), 200);
        assert_eq!(handle.finished().await, RequestState::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_before_completion_skips_callback() {
        let transport = Arc::new(ScriptedTransport {
            delay: Some(Duration::from_millis(200)),
            ..ScriptedTransport::always(200)
        });
        let ctrl = controller(resolver(2), Arc::default(), transport);
        let called = Arc::new(AtomicUsize::new(0));
        let seen = called.clone();

        let mut handle = ctrl.perform(ApiRequest::get("videos", "x"), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();

        assert_eq!(handle.finished().await, RequestState::Cancelled);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_response_arrives_skips_callback() {
        let transport = Arc::new(ScriptedTransport {
            delay: Some(Duration::from_millis(50)),
            ..ScriptedTransport::always(200)
        });
        let ctrl = controller(resolver(2), Arc::default(), transport.clone());
        let called = Arc::new(AtomicUsize::new(0));
        let seen = called.clone();

        let mut handle = ctrl.perform(ApiRequest::get("videos", "x"), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        *transport.cancel_on_send.lock().unwrap() = Some(handle.clone());

        assert_eq!(handle.finished().await, RequestState::Cancelled);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), RequestState::Cancelled);
    }

    #[tokio::test]
    async fn test_late_cancel_keeps_terminal_state() {
        let transport = Arc::new(ScriptedTransport::always(200));
        let ctrl = controller(resolver(2), Arc::default(), transport);
        let (tx, rx) = tokio::sync::oneshot::channel();

        let mut handle = ctrl.perform(ApiRequest::get("videos", "x"), move |result| {
            let _ = tx.send(result.is_ok());
        });
        assert!(rx.await.unwrap());
        assert_eq!(handle.finished().await, RequestState::Succeeded);

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), RequestState::Succeeded);
    }
}
