//! Input/output types for the score engine (JSON contract with the report engine).

use serde::{Deserialize, Serialize};

use crate::error::ScoreError;

// ---------------------------------------------------------------------------
// Report keys
// ---------------------------------------------------------------------------

/// What a report key groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKeyKind {
  Tier,
  Application,
  Deployment,
}

impl ReportKeyKind {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "tier" | "tiers" => Some(Self::Tier),
      "app" | "apps" | "application" | "applications" => Some(Self::Application),
      "deployment" | "deployments" | "dep" => Some(Self::Deployment),
      _ => None,
    }
  }
}

/// A named unit that gets one score and one ranked report row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportKey {
  pub name: String,
  pub kind: ReportKeyKind,
  /// Pinned keys always rank ahead of non-pinned ones.
  #[serde(default)]
  pub is_key: bool,
  /// Number of units this key stands for (e.g. apps in a group). Zero is treated as one.
  #[serde(default = "default_weight")]
  pub weight: u32,
}

fn default_weight() -> u32 {
  1
}

impl ReportKey {
  pub fn new(name: impl Into<String>, kind: ReportKeyKind) -> Self {
    Self {
      name: name.into(),
      kind,
      is_key: false,
      weight: 1,
    }
  }

  pub fn pinned(mut self) -> Self {
    self.is_key = true;
    self
  }

  pub fn with_weight(mut self, weight: u32) -> Self {
    self.weight = weight;
    self
  }
}

// ---------------------------------------------------------------------------
// Counts and settings
// ---------------------------------------------------------------------------

/// Classified issue counts for one report key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
  #[serde(default)]
  pub new_issues: u64,
  #[serde(default)]
  pub severe_new_issues: u64,
  #[serde(default)]
  pub regressions: u64,
  #[serde(default)]
  pub severe_regressions: u64,
  #[serde(default)]
  pub slowdowns: u64,
  #[serde(default)]
  pub severe_slowdowns: u64,
}

impl IssueCounts {
  pub fn total(&self) -> u64 {
    self.new_issues
      + self.severe_new_issues
      + self.regressions
      + self.severe_regressions
      + self.slowdowns
      + self.severe_slowdowns
  }
}

/// Per-service scoring weights. No `Default`: every deployment supplies its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSettings {
  /// Deduction per new issue.
  pub new_event_score: f64,
  /// Deduction per severe new issue.
  pub severe_new_event_score: f64,
  /// Deduction per regression (and per slowdown).
  pub regression_score: f64,
  /// Deduction per severe regression (and per severe slowdown).
  pub severe_regression_score: f64,
  /// Multiplier applied to the normalized deduction.
  pub score_weight: f64,
  /// Multiplier for pinned keys; falls back to `score_weight` when unset.
  #[serde(default)]
  pub key_score_weight: Option<f64>,
}

impl ScoreSettings {
  pub fn validate(&self) -> Result<(), ScoreError> {
    let fields = [
      ("new_event_score", self.new_event_score),
      ("severe_new_event_score", self.severe_new_event_score),
      ("regression_score", self.regression_score),
    ];
    for (field, value) in fields {
      check_weight(field, value)?;
    }
    // A severe regression must always cost something.
    check_positive("severe_regression_score", self.severe_regression_score)?;
    check_positive("score_weight", self.score_weight)?;
    if let Some(w) = self.key_score_weight {
      check_positive("key_score_weight", w)?;
    }
    Ok(())
  }
}

fn check_weight(field: &str, value: f64) -> Result<(), ScoreError> {
  if !value.is_finite() || value < 0.0 {
    return Err(ScoreError::invalid_setting(field, "must be a finite, non-negative number"));
  }
  Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<(), ScoreError> {
  if !value.is_finite() || value <= 0.0 {
    return Err(ScoreError::invalid_setting(field, "must be a finite, positive number"));
  }
  Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionKind {
  NewIssues,
  SevereNewIssues,
  Regressions,
  SevereRegressions,
  Slowdowns,
  SevereSlowdowns,
}

/// One line of the raw deduction: `count * per_issue = total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deduction {
  pub kind: DeductionKind,
  pub count: u64,
  pub per_issue: f64,
  pub total: f64,
  pub explanation: String,
}

/// Full derivation of a key's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
  pub key: ReportKey,
  pub raw_deductions: Vec<Deduction>,
  pub raw_deduction: f64,
  pub window_days: f64,
  pub app_factor: f64,
  pub raw_score: f64,
  pub weight: f64,
  /// 0..=100, higher is healthier.
  pub final_score: f64,
}

/// A scored key as seen by the ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredKey {
  pub breakdown: ScoreBreakdown,
  /// Active-window hits / invocations, 0 when there was no traffic.
  pub failure_rate: f64,
}

impl ScoredKey {
  pub fn key(&self) -> &ReportKey {
    &self.breakdown.key
  }

  pub fn score(&self) -> f64 {
    self.breakdown.final_score
  }
}

/// How the ranker orders keys within the same pin status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMode {
  #[default]
  ByScore,
  ByName,
}

// ---------------------------------------------------------------------------
// Binary contract
// ---------------------------------------------------------------------------

/// Input: one JSON object on stdin.
#[derive(Debug, Deserialize)]
pub struct Input {
  pub key: ReportKey,
  pub counts: IssueCounts,
  pub window_minutes: u64,
  pub settings: ScoreSettings,
}
