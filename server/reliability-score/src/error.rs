//! Structured error types for the score engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
  #[error("invalid setting: {field}: {reason}")]
  InvalidSetting { field: String, reason: String },
}

impl ScoreError {
  pub fn invalid_setting(field: &str, reason: &str) -> Self {
    Self::InvalidSetting {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }
}
