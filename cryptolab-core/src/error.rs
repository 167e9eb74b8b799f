//! Error classification shared by every layer.
//!
//! Each layer has its own `thiserror` enum; `class()` maps a concrete error
//! onto the handling policy the orchestrator applies to a unit of work.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a failed operation should be handled by whoever invoked it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The caller must fix the input. Never retried.
    InvalidRequest,
    /// The provider kept answering 429. Retry later with backoff.
    RateLimitExceeded,
    /// 5xx, timeouts, connection failures, open circuit breaker. Retry later.
    UpstreamUnavailable,
    /// A storage write failed. Fatal for the current unit of work.
    StorageWriteFailure,
    /// Opening or querying storage failed.
    StorageReadFailure,
    /// Not enough points for a statistic. Skip and continue.
    InsufficientData,
    /// Nothing to draw. Skip and continue.
    NoDataToRender,
    /// The unit was cancelled before committing anything.
    Cancelled,
}

impl ErrorClass {
    /// Retryable at the workflow level.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::RateLimitExceeded | ErrorClass::UpstreamUnavailable
        )
    }

    /// Reported as a warning; a batch keeps going.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorClass::InsufficientData | ErrorClass::NoDataToRender
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::InvalidRequest => "InvalidRequest",
            ErrorClass::RateLimitExceeded => "RateLimitExceeded",
            ErrorClass::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorClass::StorageWriteFailure => "StorageWriteFailure",
            ErrorClass::StorageReadFailure => "StorageReadFailure",
            ErrorClass::InsufficientData => "InsufficientData",
            ErrorClass::NoDataToRender => "NoDataToRender",
            ErrorClass::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_and_recovery_are_disjoint() {
        let all = [
            ErrorClass::InvalidRequest,
            ErrorClass::RateLimitExceeded,
            ErrorClass::UpstreamUnavailable,
            ErrorClass::StorageWriteFailure,
            ErrorClass::StorageReadFailure,
            ErrorClass::InsufficientData,
            ErrorClass::NoDataToRender,
            ErrorClass::Cancelled,
        ];
        for class in all {
            assert!(!(class.is_retryable() && class.is_recoverable()), "{class}");
        }
        assert!(!ErrorClass::InvalidRequest.is_retryable());
        assert!(!ErrorClass::StorageWriteFailure.is_recoverable());
    }
}
