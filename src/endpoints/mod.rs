//! Endpoint Directory Module
//!
//! # Responsibilities
//! - Model the remote Endpoints and Settings payloads
//! - Resolve a module name to its active base URL
//! - Rotate modules across hosts on failure, bounded by a failure budget
//!
//! # Data Flow
//! ```text
//! Endpoints generation ──▶ EndpointDirectory::from_endpoints
//!                                 │
//!        resolve(module) ◀────────┤
//!                                 │ rotate_if_needed(module, previous_host)
//!                                 ▼
//!              ModuleListener::module_changed  (under the module lock)
//!                                 │
//!                                 ▼
//!              ModuleListener::flush           (after the lock is released)
//!                                 │
//!                                 ▼
//!                   canonical Endpoints + persisted copy
//! ```

pub mod directory;
pub mod model;
pub mod url;

pub use directory::{EndpointDirectory, ModuleListener, DEFAULT_MAX_FAILS};
pub use model::{AuthMap, AuthSetting, Endpoints, FeatureToggle, FormatMap, Module, RefreshRate, Settings};
