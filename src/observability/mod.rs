//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! directory / coordinator / retry controller produce:
//!     → logging.rs (structured tracing events, per-request spans)
//!     → metrics.rs (counters and a latency histogram)
//!
//! Consumers:
//!     → the fmt subscriber installed by init_logging
//!     → whatever metrics recorder the host application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a metrics exporter; without a recorder the
//!   macros are no-ops
//! - Request ID (uuid v4) is attached to the span of every logical request

pub mod logging;
pub mod metrics;
