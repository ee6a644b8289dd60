//! Reliability score: 100 minus weighted, window- and size-normalized deductions.

use crate::types::{
  Deduction, DeductionKind, IssueCounts, ReportKey, ReportKeyKind, ScoreBreakdown, ScoreSettings,
};

pub const MINUTES_PER_DAY: f64 = 1440.0;
pub const MAX_SCORE: f64 = 100.0;

/// Score one report key.
///
/// `window_minutes` is the span the counts were observed over. Keys covering
/// several days or several apps are normalized so they are not punished for
/// their size alone.
pub fn score(
  key: &ReportKey,
  counts: &IssueCounts,
  window_minutes: u64,
  settings: &ScoreSettings,
) -> ScoreBreakdown {
  let raw_deductions = compute_deductions(key.kind, counts, settings);
  let raw_deduction: f64 = raw_deductions.iter().map(|d| d.total).sum();

  let window_days = (window_minutes as f64 / MINUTES_PER_DAY).max(1.0);
  let app_factor = f64::from(key.weight.max(1));
  let raw_score = raw_deduction / window_days / app_factor;

  let weight = weight_for(key, settings);
  let final_score = (MAX_SCORE - weight * raw_score).max(0.0);

  ScoreBreakdown {
    key: key.clone(),
    raw_deductions,
    raw_deduction,
    window_days,
    app_factor,
    raw_score,
    weight,
    final_score,
  }
}

/// Multiplier for a key: the pinned-key weight when one is configured, else the default.
pub fn weight_for(key: &ReportKey, settings: &ScoreSettings) -> f64 {
  match (key.is_key, settings.key_score_weight) {
    (true, Some(w)) => w,
    _ => settings.score_weight,
  }
}

/// Deduction lines for every non-zero count. Tiers are not charged for slowdowns.
pub fn compute_deductions(
  kind: ReportKeyKind,
  counts: &IssueCounts,
  settings: &ScoreSettings,
) -> Vec<Deduction> {
  let mut lines = vec![
    (DeductionKind::NewIssues, counts.new_issues, settings.new_event_score),
    (DeductionKind::SevereNewIssues, counts.severe_new_issues, settings.severe_new_event_score),
    (DeductionKind::Regressions, counts.regressions, settings.regression_score),
    (DeductionKind::SevereRegressions, counts.severe_regressions, settings.severe_regression_score),
  ];
  if kind != ReportKeyKind::Tier {
    lines.push((DeductionKind::Slowdowns, counts.slowdowns, settings.regression_score));
    lines.push((DeductionKind::SevereSlowdowns, counts.severe_slowdowns, settings.severe_regression_score));
  }

  lines
    .into_iter()
    .filter(|(_, count, _)| *count > 0)
    .map(|(kind, count, per_issue)| {
      let total = count as f64 * per_issue;
      Deduction {
        kind,
        count,
        per_issue,
        total,
        explanation: explain(kind, count, per_issue, total),
      }
    })
    .collect()
}

fn explain(kind: DeductionKind, count: u64, per_issue: f64, total: f64) -> String {
  let (one, many) = match kind {
    DeductionKind::NewIssues => ("new issue", "new issues"),
    DeductionKind::SevereNewIssues => ("severe new issue", "severe new issues"),
    DeductionKind::Regressions => ("increasing error", "increasing errors"),
    DeductionKind::SevereRegressions => ("severely increasing error", "severely increasing errors"),
    DeductionKind::Slowdowns => ("slowdown", "slowdowns"),
    DeductionKind::SevereSlowdowns => ("severe slowdown", "severe slowdowns"),
  };
  let label = if count == 1 { one } else { many };
  format!("{} {} * {} = {}", count, label, fmt_num(per_issue), fmt_num(total))
}

fn fmt_num(v: f64) -> String {
  let rounded = (v * 100.0).round() / 100.0;
  if rounded.fract() == 0.0 {
    format!("{:.0}", rounded)
  } else {
    format!("{}", rounded)
  }
}

/// Short human-readable summary of a breakdown, worst contributors first.
pub fn compute_explanations(breakdown: &ScoreBreakdown) -> Vec<String> {
  let mut lines: Vec<&Deduction> = breakdown.raw_deductions.iter().collect();
  lines.sort_by(|a, b| b.total.total_cmp(&a.total));

  let mut out: Vec<String> = lines.iter().map(|d| d.explanation.clone()).collect();
  if breakdown.window_days > 1.0 {
    out.push(format!("Normalized over {} days", fmt_num(breakdown.window_days)));
  }
  if breakdown.app_factor > 1.0 {
    out.push(format!("Normalized over {} apps", fmt_num(breakdown.app_factor)));
  }
  if out.is_empty() {
    out.push("No issues detected".to_string());
  }
  out
}
