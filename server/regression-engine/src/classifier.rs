//! Turn the regression calculator's verdict into typed, ordered issues.
//!
//! Per partition the classifier either has both windows and a verdict
//! (`Classified`) or it does not (`NoData`). There are no retries here; a
//! missing window is a normal outcome.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use reliability_score::IssueCounts;

use crate::api::{
  PerformanceCalculator, PerformanceInput, RateChange, RegressionCalculator, RegressionInput,
  RegressionVerdict,
};
use crate::config::RegressionThresholds;
use crate::dedup;
use crate::determinant::DeterminantKey;
use crate::types::{
  AggregatedEvent, ClassifiedIssue, Graph, IssueKind, IssueSubject, PerformanceState, RawEvent,
  TransactionSlowdown,
};

pub struct ClassifierInput<'a> {
  pub determinant: &'a DeterminantKey,
  pub events: &'a [RawEvent],
  pub active: Option<&'a Graph>,
  pub baseline: Option<&'a Graph>,
  pub thresholds: &'a RegressionThresholds,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
  NoData,
  Classified(Vec<ClassifiedIssue>),
}

impl Classification {
  pub fn issues(&self) -> &[ClassifiedIssue] {
    match self {
      Self::NoData => &[],
      Self::Classified(issues) => issues,
    }
  }

  pub fn into_issues(self) -> Vec<ClassifiedIssue> {
    match self {
      Self::NoData => Vec::new(),
      Self::Classified(issues) => issues,
    }
  }
}

/// Classify one partition. Slowdowns are only evaluated when a performance
/// calculator is given.
pub fn classify(
  input: &ClassifierInput<'_>,
  regressions: &dyn RegressionCalculator,
  performance: Option<&dyn PerformanceCalculator>,
) -> Classification {
  let (Some(active), Some(baseline)) = (input.active, input.baseline) else {
    return Classification::NoData;
  };
  if active.is_empty() || baseline.is_empty() {
    return Classification::NoData;
  }

  let Some(verdict) = regressions.evaluate(&RegressionInput {
    determinant: input.determinant,
    events: input.events,
    active,
    baseline,
    thresholds: input.thresholds,
  }) else {
    return Classification::NoData;
  };

  let mut issues = event_issues(input.events, &verdict, input.thresholds);
  if let Some(perf) = performance {
    let results = perf.evaluate(&PerformanceInput {
      determinant: input.determinant,
      active,
      baseline,
    });
    issues.extend(results.into_iter().filter_map(|t| {
      let kind = match t.state {
        PerformanceState::Ok => return None,
        PerformanceState::Slowing => IssueKind::Slowdown,
        PerformanceState::Critical => IssueKind::SevereSlowdown,
      };
      Some(ClassifiedIssue {
        kind,
        delta: t.score,
        subject: IssueSubject::Transaction(TransactionSlowdown {
          transaction: t.transaction,
          state: t.state,
          score: t.score,
        }),
      })
    }));
  }

  sort_issues(&mut issues, input.thresholds);
  Classification::Classified(issues)
}

fn event_issues(
  events: &[RawEvent],
  verdict: &RegressionVerdict,
  thresholds: &RegressionThresholds,
) -> Vec<ClassifiedIssue> {
  let mut issues = Vec::new();
  for event in events {
    if let Some((kind, delta)) = classify_event(event, verdict, thresholds) {
      issues.push(ClassifiedIssue {
        kind,
        subject: IssueSubject::Event(AggregatedEvent::single(event.clone())),
        delta,
      });
    }
  }
  drop_spurious_new(issues, events, verdict)
}

fn classify_event(
  event: &RawEvent,
  verdict: &RegressionVerdict,
  thresholds: &RegressionThresholds,
) -> Option<(IssueKind, f64)> {
  let id = event.id.as_str();
  if verdict.is_new(id) {
    let severe = verdict.severe_new_ids.contains(id)
      || event.hits >= thresholds.severe_new_volume
      || thresholds.is_critical_exception(&event.name)
      || event.is_uncaught();
    let kind = if severe {
      IssueKind::SevereNewIssue
    } else {
      IssueKind::NewIssue
    };
    return Some((kind, 0.0));
  }
  if let Some(change) = verdict.severe_regressions.get(id) {
    return Some((IssueKind::SevereRegression, change.delta()));
  }
  verdict.regressions.get(id).map(|change: &RateChange| {
    let delta = change.delta();
    if delta >= thresholds.critical_regression_delta {
      (IssueKind::SevereRegression, delta)
    } else {
      (IssueKind::Regression, delta)
    }
  })
}

/// A "new" event whose similar ids name an event already present in the
/// window (and not itself new) is an old issue seen from a new call site.
fn drop_spurious_new(
  issues: Vec<ClassifiedIssue>,
  events: &[RawEvent],
  verdict: &RegressionVerdict,
) -> Vec<ClassifiedIssue> {
  let existing: HashSet<&str> = events
    .iter()
    .map(|e| e.id.as_str())
    .filter(|id| !verdict.is_new(id))
    .collect();

  issues
    .into_iter()
    .filter(|issue| {
      if !issue.kind.is_new() {
        return true;
      }
      let Some(event) = issue.event() else {
        return true;
      };
      !event
        .representative
        .similar_event_ids
        .iter()
        .any(|id| existing.contains(id.as_str()))
    })
    .collect()
}

/// Kind precedence first. New kinds put critical exception types first, then
/// volume descending; everything else sorts by delta descending.
pub fn sort_issues(issues: &mut [ClassifiedIssue], thresholds: &RegressionThresholds) {
  issues.sort_by(|a, b| {
    a.kind
      .cmp(&b.kind)
      .then_with(|| compare_within_kind(a, b, thresholds))
  });
}

fn compare_within_kind(a: &ClassifiedIssue, b: &ClassifiedIssue, thresholds: &RegressionThresholds) -> Ordering {
  if a.kind.is_new() {
    let critical = |i: &ClassifiedIssue| {
      i.event()
        .is_some_and(|e| thresholds.is_critical_exception(&e.representative.name))
    };
    let hits = |i: &ClassifiedIssue| i.event().map_or(0, |e| e.hits);
    critical(b)
      .cmp(&critical(a))
      .then_with(|| hits(b).cmp(&hits(a)))
  } else {
    b.delta.total_cmp(&a.delta)
  }
}

/// Combine the issues of every partition of one report key.
///
/// An event or transaction reported by several partitions keeps its most
/// severe classification once. Duplicate identities are then merged and the
/// result re-sorted.
pub fn consolidate(
  partitions: Vec<Vec<ClassifiedIssue>>,
  thresholds: &RegressionThresholds,
  group_by_entry_point: bool,
) -> Vec<ClassifiedIssue> {
  let mut best: BTreeMap<(bool, String), ClassifiedIssue> = BTreeMap::new();
  for issue in partitions.into_iter().flatten() {
    let subject_key = match &issue.subject {
      IssueSubject::Event(e) => (false, e.id().to_string()),
      IssueSubject::Transaction(t) => (true, t.transaction.clone()),
    };
    match best.get(&subject_key) {
      Some(current) if !more_severe(&issue, current) => {}
      _ => {
        best.insert(subject_key, issue);
      }
    }
  }

  let mut issues = dedup::dedup_issues(best.into_values().collect(), group_by_entry_point);
  sort_issues(&mut issues, thresholds);
  issues
}

fn more_severe(candidate: &ClassifiedIssue, current: &ClassifiedIssue) -> bool {
  match candidate.kind.cmp(&current.kind) {
    Ordering::Less => true,
    Ordering::Greater => false,
    Ordering::Equal => candidate.delta > current.delta,
  }
}

pub fn count_issues(issues: &[ClassifiedIssue]) -> IssueCounts {
  let mut counts = IssueCounts::default();
  for issue in issues {
    let slot = match issue.kind {
      IssueKind::NewIssue => &mut counts.new_issues,
      IssueKind::SevereNewIssue => &mut counts.severe_new_issues,
      IssueKind::Regression => &mut counts.regressions,
      IssueKind::SevereRegression => &mut counts.severe_regressions,
      IssueKind::Slowdown => &mut counts.slowdowns,
      IssueKind::SevereSlowdown => &mut counts.severe_slowdowns,
    };
    *slot += 1;
  }
  counts
}
