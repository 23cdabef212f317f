//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! ApiRequest
//!     → controller.rs (resolve module, sign, send, classify the outcome)
//!     → On failure: retries.rs (veto by status / application code, bound)
//!     → EndpointResolver::rotate_if_needed and RequestSigner::correct_skew
//!     → backoff.rs (optional delay before resubmitting)
//! ```
//!
//! # Design Decisions
//! - Attempts of one logical request are strictly sequential
//! - Total resubmissions are bounded by the host count so a fully failing
//!   pool terminates
//! - The controller never returns an error past itself other than the
//!   terminal `ApiError`

pub mod backoff;
pub mod controller;
pub mod retries;

pub use controller::{
    EndpointResolver, RequestHandle, RequestRetryController, RequestSigner, RequestState,
};
pub use retries::RetryPolicy;
