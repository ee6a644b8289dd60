//! Reliability Score Engine: weighted issue deductions per report key, and key ranking.
//! Used by the binary for stdin/stdout; called as a library by regression-engine.

pub mod error;
pub mod rank;
pub mod score;
pub mod types;

pub use error::ScoreError;
pub use rank::{compare_deployments, compare_keys, rank};
pub use score::{compute_explanations, score};
pub use types::{
  Deduction, DeductionKind, Input, IssueCounts, RankMode, ReportKey, ReportKeyKind, ScoreBreakdown,
  ScoreSettings, ScoredKey,
};

/// Validate settings and score one input (no I/O).
pub fn run(input: &Input) -> Result<ScoreBreakdown, ScoreError> {
  input.settings.validate()?;
  Ok(score(&input.key, &input.counts, input.window_minutes, &input.settings))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn run_returns_valid_output_shape() {
    let input: Input = serde_json::from_str(
      r#"{
        "key": {"name": "billing", "kind": "application", "is_key": true},
        "counts": {"new_issues": 1, "severe_regressions": 2},
        "window_minutes": 2880,
        "settings": {
          "new_event_score": 1.0,
          "severe_new_event_score": 2.0,
          "regression_score": 0.5,
          "severe_regression_score": 1.0,
          "score_weight": 2.5
        }
      }"#,
    )
    .unwrap();
    let out = run(&input).unwrap();
    assert!(out.final_score <= 100.0);
    assert_eq!(out.window_days, 2.0);
    assert_eq!(out.raw_deductions.len(), 2);
  }

  #[test]
  fn run_rejects_bad_settings() {
    let input = Input {
      key: ReportKey::new("a", ReportKeyKind::Tier),
      counts: IssueCounts::default(),
      window_minutes: 60,
      settings: ScoreSettings {
        new_event_score: f64::INFINITY,
        severe_new_event_score: 1.0,
        regression_score: 1.0,
        severe_regression_score: 1.0,
        score_weight: 1.0,
        key_score_weight: None,
      },
    };
    assert!(run(&input).is_err());
  }
}
