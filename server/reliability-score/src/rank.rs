//! Ordering and limiting of scored report keys.

use std::borrow::Borrow;
use std::cmp::Ordering;

use tracing::debug;

use crate::types::{RankMode, ReportKeyKind, ScoredKey};

/// Sort keys (or rows wrapping them) for display and keep the first `limit`.
///
/// Pinned keys come first. Truncation happens only after the full sort, so
/// the worst keys are never cut before they are compared.
pub fn rank<T: Borrow<ScoredKey>>(mut keys: Vec<T>, mode: RankMode, limit: Option<usize>) -> Vec<T> {
  keys.sort_by(|a, b| compare_ranked(a.borrow(), b.borrow(), mode));
  let total = keys.len();
  if let Some(limit) = limit {
    keys.truncate(limit);
  }
  debug!(total, kept = keys.len(), ?mode, "ranked report keys");
  keys
}

/// Full ordering used by [`rank`].
///
/// By score, deployments form their own group after every other key and are
/// ordered by version; the rest are ordered by [`compare_keys`]. Mixing the two
/// comparators inside one group would not be a total order.
pub fn compare_ranked(a: &ScoredKey, b: &ScoredKey, mode: RankMode) -> Ordering {
  b.key()
    .is_key
    .cmp(&a.key().is_key)
    .then_with(|| match mode {
      RankMode::ByName => a.key().name.cmp(&b.key().name),
      RankMode::ByScore => {
        let a_dep = a.key().kind == ReportKeyKind::Deployment;
        let b_dep = b.key().kind == ReportKeyKind::Deployment;
        a_dep.cmp(&b_dep).then_with(|| {
          if a_dep {
            compare_deployments(&a.key().name, &b.key().name)
          } else {
            compare_keys(a, b)
          }
        })
      }
    })
    .then_with(|| a.key().name.cmp(&b.key().name))
}

/// Lower score (less reliable) first; equal scores put the higher failure rate first.
pub fn compare_keys(a: &ScoredKey, b: &ScoredKey) -> Ordering {
  a.score()
    .total_cmp(&b.score())
    .then_with(|| b.failure_rate.total_cmp(&a.failure_rate))
}

/// Newest deployment first, comparing numeric runs as numbers
/// (`v1.10` is newer than `v1.9`).
pub fn compare_deployments(a: &str, b: &str) -> Ordering {
  let ta = version_tokens(a);
  let tb = version_tokens(b);
  for (x, y) in ta.iter().zip(tb.iter()) {
    let ord = match (x, y) {
      (Token::Num(x), Token::Num(y)) => x.cmp(y),
      (Token::Text(x), Token::Text(y)) => x.cmp(y),
      (Token::Num(_), Token::Text(_)) => Ordering::Greater,
      (Token::Text(_), Token::Num(_)) => Ordering::Less,
    };
    if ord != Ordering::Equal {
      return ord.reverse();
    }
  }
  tb.len().cmp(&ta.len())
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
  Num(u64),
  Text(String),
}

fn version_tokens(s: &str) -> Vec<Token> {
  let mut out = Vec::new();
  let mut digits = String::new();
  let mut text = String::new();

  for c in s.chars() {
    if c.is_ascii_digit() {
      if !text.is_empty() {
        out.push(Token::Text(std::mem::take(&mut text)));
      }
      digits.push(c);
    } else if c.is_alphanumeric() {
      if !digits.is_empty() {
        out.push(Token::Num(parse_digits(&std::mem::take(&mut digits))));
      }
      text.push(c.to_ascii_lowercase());
    } else {
      // Separators only end the current run.
      if !digits.is_empty() {
        out.push(Token::Num(parse_digits(&std::mem::take(&mut digits))));
      }
      if !text.is_empty() {
        out.push(Token::Text(std::mem::take(&mut text)));
      }
    }
  }
  if !digits.is_empty() {
    out.push(Token::Num(parse_digits(&digits)));
  }
  if !text.is_empty() {
    out.push(Token::Text(text));
  }
  out
}

fn parse_digits(d: &str) -> u64 {
  d.parse().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::score::score;
  use crate::types::{IssueCounts, ReportKey, ScoreSettings};
  use test_case::test_case;

  fn settings() -> ScoreSettings {
    ScoreSettings {
      new_event_score: 1.0,
      severe_new_event_score: 2.0,
      regression_score: 0.5,
      severe_regression_score: 1.0,
      score_weight: 2.5,
      key_score_weight: None,
    }
  }

  fn scored(key: ReportKey, severe: u64, failure_rate: f64) -> ScoredKey {
    let counts = IssueCounts {
      severe_regressions: severe,
      ..IssueCounts::default()
    };
    ScoredKey {
      breakdown: score(&key, &counts, 1440, &settings()),
      failure_rate,
    }
  }

  fn names(keys: &[ScoredKey]) -> Vec<&str> {
    keys.iter().map(|k| k.key().name.as_str()).collect()
  }

  #[test]
  fn worst_score_first() {
    let keys = vec![
      scored(ReportKey::new("healthy", ReportKeyKind::Application), 0, 0.0),
      scored(ReportKey::new("broken", ReportKeyKind::Application), 10, 0.0),
      scored(ReportKey::new("shaky", ReportKeyKind::Application), 2, 0.0),
    ];
    let ranked = rank(keys, RankMode::ByScore, None);
    assert_eq!(names(&ranked), vec!["broken", "shaky", "healthy"]);
  }

  #[test]
  fn pinned_key_beats_worse_unpinned_key() {
    let keys = vec![
      scored(ReportKey::new("noisy", ReportKeyKind::Application), 10, 0.0),
      scored(ReportKey::new("pinned", ReportKeyKind::Application).pinned(), 0, 0.0),
    ];
    let ranked = rank(keys, RankMode::ByScore, None);
    assert_eq!(names(&ranked), vec!["pinned", "noisy"]);
  }

  #[test]
  fn equal_scores_break_on_failure_rate() {
    let keys = vec![
      scored(ReportKey::new("a", ReportKeyKind::Tier), 1, 0.01),
      scored(ReportKey::new("b", ReportKeyKind::Tier), 1, 0.20),
    ];
    let ranked = rank(keys, RankMode::ByScore, None);
    assert_eq!(names(&ranked), vec!["b", "a"]);
  }

  #[test]
  fn truncates_after_sorting() {
    let keys = vec![
      scored(ReportKey::new("ok1", ReportKeyKind::Application), 0, 0.0),
      scored(ReportKey::new("ok2", ReportKeyKind::Application), 0, 0.0),
      scored(ReportKey::new("worst", ReportKeyKind::Application), 20, 0.0),
    ];
    let ranked = rank(keys, RankMode::ByScore, Some(1));
    assert_eq!(names(&ranked), vec!["worst"]);
  }

  #[test]
  fn name_mode_ignores_score() {
    let keys = vec![
      scored(ReportKey::new("zeta", ReportKeyKind::Application), 10, 0.0),
      scored(ReportKey::new("alpha", ReportKeyKind::Application), 0, 0.0),
    ];
    let ranked = rank(keys, RankMode::ByName, None);
    assert_eq!(names(&ranked), vec!["alpha", "zeta"]);
  }

  #[test]
  fn deployments_sort_newest_first() {
    let keys = vec![
      scored(ReportKey::new("v1.9", ReportKeyKind::Deployment), 10, 0.0),
      scored(ReportKey::new("v1.10", ReportKeyKind::Deployment), 0, 0.0),
      scored(ReportKey::new("v1.2", ReportKeyKind::Deployment), 3, 0.0),
    ];
    let ranked = rank(keys, RankMode::ByScore, None);
    assert_eq!(names(&ranked), vec!["v1.10", "v1.9", "v1.2"]);
  }

  #[test]
  fn deployments_rank_after_other_keys() {
    let keys = vec![
      scored(ReportKey::new("v1", ReportKeyKind::Deployment), 10, 0.0),
      scored(ReportKey::new("v2", ReportKeyKind::Deployment), 0, 0.0),
      scored(ReportKey::new("billing", ReportKeyKind::Application), 4, 0.0),
    ];
    let ranked = rank(keys, RankMode::ByScore, None);
    assert_eq!(names(&ranked), vec!["billing", "v2", "v1"]);
  }

  #[test]
  fn mixed_kinds_sort_consistently() {
    let mut keys = Vec::new();
    for i in 0..30u64 {
      keys.push(scored(ReportKey::new(format!("app-{i:02}"), ReportKeyKind::Application), i % 7, 0.0));
      keys.push(scored(ReportKey::new(format!("v1.{i}"), ReportKeyKind::Deployment), (i * 5) % 11, 0.0));
      keys.push(scored(ReportKey::new(format!("tier-{i:02}"), ReportKeyKind::Tier), (i * 3) % 5, 0.0));
    }
    keys.push(scored(ReportKey::new("v9.0", ReportKeyKind::Deployment).pinned(), 0, 0.0));

    let ranked = rank(keys, RankMode::ByScore, None);
    assert_eq!(ranked.len(), 91);
    assert_eq!(ranked[0].key().name, "v9.0");
    for pair in ranked.windows(2) {
      assert_ne!(compare_ranked(&pair[0], &pair[1], RankMode::ByScore), Ordering::Greater);
    }
    let first_dep = ranked[1..]
      .iter()
      .position(|k| k.key().kind == ReportKeyKind::Deployment)
      .unwrap()
      + 1;
    assert_eq!(first_dep, 61);
    assert_eq!(ranked[first_dep].key().name, "v1.29");
    assert_eq!(ranked[90].key().name, "v1.0");
  }

  #[test_case("v1.10", "v1.9", Ordering::Less ; "numeric runs compare as numbers")]
  #[test_case("v2", "v10", Ordering::Greater ; "single numeric run")]
  #[test_case("release-5", "release-5", Ordering::Equal ; "identical")]
  #[test_case("1.2.1", "1.2", Ordering::Less ; "longer version is newer")]
  #[test_case("V3.0", "v3.0", Ordering::Equal ; "case insensitive")]
  fn deployment_comparator(a: &str, b: &str, expected: Ordering) {
    assert_eq!(compare_deployments(a, b), expected);
  }
}
