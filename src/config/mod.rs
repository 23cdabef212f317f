//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed to ApiClient::from_config at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require building a new client
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Remote configuration (Endpoints/Settings) is NOT part of this file;
//!   it lives in `server_config`

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::AuthConfig;
pub use schema::ClientConfig;
pub use schema::DeviceConfig;
pub use schema::KeyMode;
pub use schema::ObservabilityConfig;
pub use schema::RetryConfig;
pub use schema::ServerConfig;
pub use schema::TimeoutConfig;
