//! Retry classification.
//!
//! # Responsibilities
//! - Decide whether a failed response may be retried at all
//! - Bound resubmissions per logical request by the host count
//! - Bound clock-skew corrections per logical request
//!
//! # Design Decisions
//! - One canonical non-retryable status set for every call site
//! - A status OR an application code can veto a retry
//! - Backoff between attempts is optional; a zero base delay resubmits
//!   immediately

use std::collections::HashSet;
use std::time::Duration;

use crate::client::error::ApplicationError;
use crate::config::{AuthConfig, RetryConfig};
use crate::resilience::backoff::calculate_backoff;
use crate::transport::HttpResponse;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub rotation_factor: u32,
    pub max_skew_corrections: u32,
    non_retryable_statuses: HashSet<u16>,
    non_retryable_codes: HashSet<String>,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), &AuthConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(retries: &RetryConfig, auth: &AuthConfig) -> Self {
        Self {
            enabled: retries.enabled,
            rotation_factor: retries.rotation_factor,
            max_skew_corrections: auth.max_skew_corrections,
            non_retryable_statuses: retries.non_retryable_statuses.iter().copied().collect(),
            non_retryable_codes: retries
                .non_retryable_error_codes
                .iter()
                .map(|c| c.trim().to_string())
                .collect(),
            base_delay_ms: retries.base_delay_ms,
            max_delay_ms: retries.max_delay_ms,
        }
    }

    pub fn is_status_retryable(&self, status: u16) -> bool {
        !self.non_retryable_statuses.contains(&status)
    }

    pub fn is_code_retryable(&self, error: &ApplicationError) -> bool {
        match &error.raw_code {
            Some(code) => !self.non_retryable_codes.contains(code),
            None => true,
        }
    }

    /// Parsed application error if `response` must not be retried.
    pub fn veto(&self, response: &HttpResponse) -> Option<ApplicationError> {
        let error = ApplicationError::from_body(response.status, &response.body);
        if !self.is_status_retryable(response.status) || !self.is_code_retryable(&error) {
            Some(error)
        } else {
            None
        }
    }

    /// Most resubmissions allowed for one logical request.
    pub fn max_retries(&self, host_count: usize) -> u32 {
        self.rotation_factor.saturating_mul(host_count as u32)
    }

    /// Delay before resubmission number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        calculate_backoff(retry, self.base_delay_ms, self.max_delay_ms)
    }
}
