// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The structured result envelope every plugin handler reply is wrapped in
//! (§6 Structured result envelope), and the open `ErrorCode` enumeration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known error codes. `ErrorCode` is an *open* enumeration: unrecognized
/// codes round-trip through [`Custom`](ErrorCode::Custom) rather than failing
/// to deserialize, so plugins may mint their own without a core release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    DependencyMissing,
    NotReady,
    RateLimited,
    Timeout,
    NotFound,
    Internal,
    InvalidResponse,
    #[serde(other, skip_serializing)]
    Custom,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::DependencyMissing => "DEPENDENCY_MISSING",
            Self::NotReady => "NOT_READY",
            Self::RateLimited => "RATE_LIMITED",
            Self::Timeout => "TIMEOUT",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
            Self::InvalidResponse => "INVALID_RESPONSE",
            Self::Custom => "CUSTOM",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default)]
    pub retriable: bool,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None, retriable: false }
    }

    pub fn retriable(mut self) -> Self {
        self.retriable = true;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// The envelope every handler result is reported through, whether it came
/// back over `res_ch`, the fast plane, or a run's terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    /// Milliseconds since the Unix epoch.
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ResultEnvelope {
    pub fn ok(data: Value, time: u64) -> Self {
        Self { success: true, data: Some(data), message: None, error: None, time, trace_id: None, meta: None }
    }

    pub fn err(error: StructuredError, time: u64) -> Self {
        Self { success: false, data: None, message: None, error: Some(error), time, trace_id: None, meta: None }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_error_code_round_trips_as_custom() {
        let parsed: ErrorCode = serde_json::from_str("\"SOME_PLUGIN_CODE\"").unwrap();
        assert_eq!(parsed, ErrorCode::Custom);
    }

    #[test]
    fn known_error_code_round_trips() {
        let parsed: ErrorCode = serde_json::from_str("\"TIMEOUT\"").unwrap();
        assert_eq!(parsed, ErrorCode::Timeout);
    }

    #[test]
    fn ok_envelope_has_no_error() {
        let env = ResultEnvelope::ok(serde_json::json!({"hello": "world"}), 1000);
        assert!(env.success);
        assert!(env.error.is_none());
    }

    #[test]
    fn err_envelope_carries_structured_error() {
        let err = StructuredError::new(ErrorCode::Timeout, "deadline exceeded").retriable();
        let env = ResultEnvelope::err(err, 2000);
        assert!(!env.success);
        assert!(env.error.unwrap().retriable);
    }
}
