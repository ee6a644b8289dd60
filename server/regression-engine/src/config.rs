//! Engine configuration: per-service settings with sane defaults for everything
//! except scoring weights, which every service must supply.

use reliability_score::ScoreSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::EngineError;

/// Thresholds handed to the external regression calculator and used for severity promotion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegressionThresholds {
  /// Minimum active-window hits for an event to be considered at all.
  pub min_volume: u64,
  /// Minimum active-window failure rate (hits / invocations).
  pub min_error_rate: f64,
  /// Rate increase that counts as a regression.
  pub regression_delta: f64,
  /// Rate increase that promotes a regression to severe.
  pub critical_regression_delta: f64,
  /// Hits at which a new issue is promoted to severe.
  pub severe_new_volume: u64,
  /// Exception names that are always severe when new.
  pub critical_exception_types: Vec<String>,
}

impl Default for RegressionThresholds {
  fn default() -> Self {
    Self {
      min_volume: 50,
      min_error_rate: 0.1,
      regression_delta: 0.5,
      critical_regression_delta: 1.0,
      severe_new_volume: 1000,
      critical_exception_types: vec![
        "NullPointerException".into(),
        "IndexOutOfBoundsException".into(),
        "InvalidCastException".into(),
        "AssertionError".into(),
      ],
    }
  }
}

impl RegressionThresholds {
  pub fn is_critical_exception(&self, name: &str) -> bool {
    self.critical_exception_types.iter().any(|c| c == name)
  }
}

/// Tunable settings for one monitored service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
  /// Merge events that share an identity across call sites.
  #[serde(default = "defaults::group_by_entry_point")]
  pub group_by_entry_point: bool,
  /// Concurrent slice fetches and determinant sub-tasks.
  #[serde(default = "defaults::query_pool_size")]
  pub query_pool_size: usize,
  /// Concurrent report-key tasks.
  #[serde(default = "defaults::function_pool_size")]
  pub function_pool_size: usize,
  /// Extra attempts for the primary event-list fetch.
  #[serde(default = "defaults::event_fetch_retries")]
  pub event_fetch_retries: u32,
  /// Points requested for the active window when the request does not say.
  #[serde(default = "defaults::default_points")]
  pub default_points: u32,
  /// Baseline length when the request does not say.
  #[serde(default = "defaults::baseline_days")]
  pub baseline_days: u32,
  #[serde(default)]
  pub thresholds: RegressionThresholds,
  pub score: ScoreSettings,
}

mod defaults {
  pub fn group_by_entry_point() -> bool {
    true
  }
  pub fn query_pool_size() -> usize {
    8
  }
  pub fn function_pool_size() -> usize {
    4
  }
  pub fn event_fetch_retries() -> u32 {
    2
  }
  pub fn default_points() -> u32 {
    24
  }
  pub fn baseline_days() -> u32 {
    7
  }
}

impl Config {
  /// Defaults everywhere except the scoring weights.
  pub fn new(score: ScoreSettings) -> Self {
    Self {
      group_by_entry_point: defaults::group_by_entry_point(),
      query_pool_size: defaults::query_pool_size(),
      function_pool_size: defaults::function_pool_size(),
      event_fetch_retries: defaults::event_fetch_retries(),
      default_points: defaults::default_points(),
      baseline_days: defaults::baseline_days(),
      thresholds: RegressionThresholds::default(),
      score,
    }
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    if self.query_pool_size == 0 {
      return Err(EngineError::validation("query_pool_size", "must be at least 1"));
    }
    if self.function_pool_size == 0 {
      return Err(EngineError::validation("function_pool_size", "must be at least 1"));
    }
    if self.baseline_days == 0 {
      return Err(EngineError::validation("baseline_days", "must be at least 1"));
    }
    self
      .score
      .validate()
      .map_err(|e| EngineError::validation("score", &e.to_string()))
  }
}

/// Settings for every service the engine reports on.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, Config>")]
pub struct SettingsRegistry {
  services: HashMap<String, Arc<Config>>,
}

impl From<HashMap<String, Config>> for SettingsRegistry {
  fn from(services: HashMap<String, Config>) -> Self {
    Self {
      services: services.into_iter().map(|(id, c)| (id, Arc::new(c))).collect(),
    }
  }
}

impl SettingsRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_service(mut self, service_id: impl Into<String>, config: Config) -> Self {
    self.services.insert(service_id.into(), Arc::new(config));
    self
  }

  pub fn from_json(raw: &str) -> Result<Self, EngineError> {
    let registry: SettingsRegistry = serde_json::from_str(raw)?;
    registry.validate()?;
    Ok(registry)
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    for config in self.services.values() {
      config.validate()?;
    }
    Ok(())
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
    let raw = std::fs::read_to_string(path)?;
    Self::from_json(&raw)
  }

  /// Settings for a service. A service without settings is a deployment error.
  pub fn for_service(&self, service_id: &str) -> Result<Arc<Config>, EngineError> {
    self
      .services
      .get(service_id)
      .cloned()
      .ok_or_else(|| EngineError::MissingSettings {
        service_id: service_id.to_string(),
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SETTINGS: &str = r#"{
    "S1": {
      "score": {
        "new_event_score": 1.0,
        "severe_new_event_score": 2.0,
        "regression_score": 0.5,
        "severe_regression_score": 1.0,
        "score_weight": 2.5
      }
    },
    "S2": {
      "group_by_entry_point": false,
      "query_pool_size": 2,
      "thresholds": {"severe_new_volume": 10},
      "score": {
        "new_event_score": 1.0,
        "severe_new_event_score": 1.0,
        "regression_score": 1.0,
        "severe_regression_score": 1.0,
        "score_weight": 1.0,
        "key_score_weight": 3.0
      }
    }
  }"#;

  #[test]
  fn registry_parses_with_defaults() {
    let registry = SettingsRegistry::from_json(SETTINGS).unwrap();
    let s1 = registry.for_service("S1").unwrap();
    assert!(s1.group_by_entry_point);
    assert_eq!(s1.query_pool_size, 8);
    assert_eq!(s1.thresholds, RegressionThresholds::default());

    let s2 = registry.for_service("S2").unwrap();
    assert!(!s2.group_by_entry_point);
    assert_eq!(s2.query_pool_size, 2);
    assert_eq!(s2.thresholds.severe_new_volume, 10);
    assert_eq!(s2.thresholds.min_volume, 50);
    assert_eq!(s2.score.key_score_weight, Some(3.0));
  }

  #[test]
  fn missing_service_is_fatal() {
    let registry = SettingsRegistry::from_json(SETTINGS).unwrap();
    let err = registry.for_service("S9").unwrap_err();
    assert!(matches!(err, EngineError::MissingSettings { .. }));
  }

  #[test]
  fn missing_score_weights_rejected() {
    let err = SettingsRegistry::from_json(r#"{"S1": {"query_pool_size": 2}}"#);
    assert!(err.is_err());
  }

  #[test]
  fn zero_pool_rejected() {
    let raw = SETTINGS.replace("\"query_pool_size\": 2", "\"query_pool_size\": 0");
    let err = SettingsRegistry::from_json(&raw).unwrap_err();
    assert!(err.to_string().contains("query_pool_size"));
  }

  #[test]
  fn critical_exception_lookup() {
    let t = RegressionThresholds::default();
    assert!(t.is_critical_exception("NullPointerException"));
    assert!(!t.is_critical_exception("TimeoutException"));
  }
}
