//! Logical API requests.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::BTreeMap;
use url::Url;

use crate::endpoints::url::{join_url, query_string};

/// Whether a request carries the signed `Authentication` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthRequirement {
    None,
    #[default]
    Required,
}

/// A request addressed by module rather than by host.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub module: String,
    /// Path below the module's `uri/version`.
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub auth: AuthRequirement,
}

impl ApiRequest {
    pub fn new(method: Method, module: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            path: path.into(),
            query: BTreeMap::new(),
            method,
            headers: HeaderMap::new(),
            body: None,
            auth: AuthRequirement::default(),
        }
    }

    pub fn get(module: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(Method::GET, module, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_auth(mut self, auth: AuthRequirement) -> Self {
        self.auth = auth;
        self
    }

    /// Absolute URL of this request under a module base URL.
    pub fn url_for(&self, base: &str) -> Result<Url, url::ParseError> {
        let joined = join_url(&[base, &self.path]);
        Url::parse(&format!("{joined}{}", query_string(&self.query)))
    }
}
