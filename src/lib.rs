//! Resilient API Client Library
//!
//! Module-addressed HTTP requests with host failover, signed headers,
//! clock-skew repair and coalesced remote configuration.

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod endpoints;
pub mod observability;
pub mod resilience;
pub mod server_config;
pub mod storage;
pub mod transport;

pub use client::{ApiClient, ApiError, ApiRequest, AuthRequirement};
pub use config::schema::ClientConfig;
pub use server_config::ServerConfigManager;
