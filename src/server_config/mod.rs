//! Server Configuration Module
//!
//! # Responsibilities
//! - Load Endpoints and Settings from storage, falling back to bundled payloads
//! - Fetch fresh payloads from the config server, coalescing concurrent callers
//! - Own the canonical configuration and rebuild the endpoint directory on
//!   each new Endpoints generation
//! - Burst the cache on demand or when the caller's timestamps are stale
//!
//! # Data Flow
//! ```text
//! fetch_from_storage ──▶ KeyValueStore / bundled file ──┐
//!                                                        ├──▶ CanonicalConfig
//! fetch_from_network ──▶ Transport (endpoints ∥ settings)┘        │
//!                                                                 ▼
//!                                             EndpointDirectory (per generation)
//!                                                                 │
//!                              rotation ──▶ ModuleListener ───────┘ (persist)
//! ```
//!
//! # Design Decisions
//! - Concurrent fetches of the same kind share one round-trip and one result
//! - Directory mutations from an older generation are ignored

pub mod canonical;
pub mod coordinator;

pub use canonical::CanonicalConfig;
pub use coordinator::{
    ConfigRequestTarget, FetchState, GeoLocation, NetworkFetchResult, ServerConfigManager,
    SKIP_TIMESTAMP,
};
