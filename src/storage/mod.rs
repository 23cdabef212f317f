//! Durable key-value storage.
//!
//! # Data Flow
//! ```text
//! server_config (Endpoints / Settings JSON)  ─┐
//! auth::skew (clock-skew integer)            ─┼─▶ KeyValueStore::set
//! client (generated user id)                 ─┘
//!
//! startup → KeyValueStore::get → parse → adopt
//! ```
//!
//! # Design Decisions
//! - Values are opaque strings; each owner picks its own encoding
//! - Writes are best-effort for callers: failures are logged, not surfaced
//! - Synchronous API; every implementation here is cheap enough to call
//!   from async code without `spawn_blocking`

pub mod file;
pub mod memory;

use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Key for the serialized Endpoints generation.
pub const ENDPOINTS_KEY: &str = "api.endpoints";
/// Key for the serialized Settings generation.
pub const SETTINGS_KEY: &str = "api.settings";
/// Key for the learned clock-skew correction (seconds).
pub const CLOCK_SKEW_KEY: &str = "api.clock_skew";
/// Key for the generated device user id.
pub const USER_ID_KEY: &str = "api.user_id";

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable string storage consumed by the client.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}
