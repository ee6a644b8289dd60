//! Structured error types for the regression engine.
//!
//! `EngineError` is fatal for the report it occurs in. Missing data is never an
//! error; upstream `ApiError`s are logged and mapped to "no data" where they occur.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid time range: from={from} to={to}")]
  InvalidRange { from: DateTime<Utc>, to: DateTime<Utc> },

  #[error("no settings configured for service {service_id}")]
  MissingSettings { service_id: String },

  #[error("task {label} failed: {reason}")]
  Task { label: String, reason: String },

  #[error("task join: {0}")]
  Join(#[from] tokio::task::JoinError),

  #[error("worker pool closed")]
  PoolClosed,

  #[error("unexpected task output: expected {expected}, got {got}")]
  UnexpectedOutput { expected: &'static str, got: &'static str },
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn task(label: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Task {
      label: label.into(),
      reason: reason.into(),
    }
  }
}

/// Failure reported by the telemetry API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
  #[error("bad response: {reason}")]
  BadResponse { reason: String },

  #[error("unavailable: {reason}")]
  Unavailable { reason: String },
}

impl ApiError {
  pub fn bad_response(reason: impl Into<String>) -> Self {
    Self::BadResponse {
      reason: reason.into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validation_display_names_field() {
    let err = EngineError::validation("service_id", "must not be empty");
    assert_eq!(err.to_string(), "validation: service_id: must not be empty");
  }

  #[test]
  fn missing_settings_display() {
    let err = EngineError::MissingSettings {
      service_id: "S42".into(),
    };
    assert_eq!(err.to_string(), "no settings configured for service S42");
  }

  #[test]
  fn api_error_display() {
    assert_eq!(ApiError::bad_response("502").to_string(), "bad response: 502");
  }
}
