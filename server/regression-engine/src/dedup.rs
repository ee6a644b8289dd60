//! Collapse events that share an [`EventIdentity`] into one aggregated event.
//!
//! Identities are computed once from the input; merged results are never
//! re-grouped. Aggregated events are always built from scratch.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use crate::identity::EventIdentity;
use crate::types::{AggregatedEvent, ClassifiedIssue, IssueKind, IssueSubject, RawEvent};

/// Merge duplicate raw events. With grouping off, every event passes through 1:1.
pub fn dedup(events: Vec<RawEvent>, group_by_entry_point: bool) -> Vec<AggregatedEvent> {
  let events: Vec<AggregatedEvent> = events.into_iter().map(AggregatedEvent::single).collect();
  if !group_by_entry_point {
    return events;
  }
  buckets(events, |e| EventIdentity::of(&e.representative))
    .into_iter()
    .map(merge_bucket)
    .collect()
}

/// Merge issues of the same kind whose events share an identity.
///
/// The merged issue keeps the kind and delta of its representative.
/// Transaction issues pass through.
pub fn dedup_issues(issues: Vec<ClassifiedIssue>, group_by_entry_point: bool) -> Vec<ClassifiedIssue> {
  if !group_by_entry_point {
    return issues;
  }
  buckets(issues, issue_identity)
    .into_iter()
    .map(|mut bucket| {
      if bucket.len() == 1 {
        return bucket.remove(0);
      }
      let rep = representative_index(bucket.iter().map(|i| i.event().map_or(0, |e| e.hits)));
      let kind = bucket[rep].kind;
      let delta = bucket[rep].delta;
      let events = bucket
        .into_iter()
        .filter_map(|i| match i.subject {
          IssueSubject::Event(e) => Some(e),
          IssueSubject::Transaction(_) => None,
        })
        .collect();
      ClassifiedIssue {
        kind,
        subject: IssueSubject::Event(merge_bucket(events)),
        delta,
      }
    })
    .collect()
}

fn issue_identity(issue: &ClassifiedIssue) -> Option<(IssueKind, EventIdentity)> {
  let event = issue.event()?;
  Some((issue.kind, EventIdentity::of(&event.representative)?))
}

/// Group items by key in first-seen order. Items without a key get a bucket of their own.
fn buckets<T, K, F>(items: Vec<T>, key: F) -> Vec<Vec<T>>
where
  K: Hash + Eq,
  F: Fn(&T) -> Option<K>,
{
  let mut index: HashMap<K, usize> = HashMap::new();
  let mut out: Vec<Vec<T>> = Vec::new();
  for item in items {
    match key(&item) {
      Some(k) => match index.get(&k) {
        Some(&slot) => out[slot].push(item),
        None => {
          index.insert(k, out.len());
          out.push(vec![item]);
        }
      },
      None => out.push(vec![item]),
    }
  }
  out
}

/// Position of the greatest value; ties keep the first.
fn representative_index(hits: impl Iterator<Item = u64>) -> usize {
  let mut best = 0;
  let mut best_hits = None;
  for (i, h) in hits.enumerate() {
    if best_hits.map_or(true, |b| h > b) {
      best = i;
      best_hits = Some(h);
    }
  }
  best
}

fn merge_bucket(mut bucket: Vec<AggregatedEvent>) -> AggregatedEvent {
  if bucket.len() == 1 {
    return bucket.remove(0);
  }

  let rep = representative_index(bucket.iter().map(|e| e.hits));
  let hits = bucket.iter().map(|e| e.hits).sum();
  let invocations = bucket.iter().map(|e| e.invocations).sum();
  let issue_link = bucket.iter().rev().find_map(|e| e.issue_link.clone());

  let rep_id = bucket[rep].id().to_string();
  let mut seen: HashSet<String> = HashSet::new();
  let mut similar_ids = Vec::new();
  for (i, e) in bucket.iter().enumerate() {
    let own = (i != rep).then(|| e.id().to_string());
    for id in own.into_iter().chain(e.similar_ids.iter().cloned()) {
      if id != rep_id && seen.insert(id.clone()) {
        similar_ids.push(id);
      }
    }
  }

  AggregatedEvent {
    representative: bucket.swap_remove(rep).representative,
    similar_ids,
    hits,
    invocations,
    issue_link,
  }
}

/// Active-window events of every reported key, shared by the key tasks of a report.
///
/// Events are unioned by id, so keys that overlap (an application and one of
/// its deployments) count each event once. Volume is computed over the union,
/// and grouped events count under their representative's entry point.
#[derive(Debug, Clone, Default)]
pub struct EntryPointCounter {
  events: Arc<Mutex<BTreeMap<String, RawEvent>>>,
}

impl EntryPointCounter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self, events: &[RawEvent]) {
    let mut seen = self.events.lock();
    for e in events {
      seen.entry(e.id.clone()).or_insert_with(|| e.clone());
    }
  }

  /// Hits per entry point over everything recorded so far.
  pub fn volume(&self, group_by_entry_point: bool) -> BTreeMap<String, u64> {
    let events: Vec<RawEvent> = self.events.lock().values().cloned().collect();
    let mut counts = BTreeMap::new();
    for e in dedup(events, group_by_entry_point) {
      if let Some(entry_point) = e.representative.entry_point {
        *counts.entry(entry_point).or_default() += e.hits;
      }
    }
    counts
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Location, PerformanceState, TransactionSlowdown};
  use proptest::prelude::*;

  fn event(id: &str, class: Option<&str>, hits: u64) -> RawEvent {
    RawEvent {
      id: id.into(),
      event_type: "Logged Error".into(),
      name: "IOException".into(),
      entry_point: Some(format!("Servlet{id}")),
      origin: None,
      error: class.map(|c| Location::new(c, "save", "()V")),
      call_stack_group: None,
      hits,
      invocations: hits * 10,
      similar_event_ids: Vec::new(),
      issue_link: None,
    }
  }

  #[test]
  fn representative_has_most_hits() {
    let out = dedup(
      vec![
        event("a", Some("C"), 5),
        event("b", Some("C"), 9),
        event("c", Some("C"), 3),
      ],
      true,
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id(), "b");
    assert_eq!(out[0].similar_ids, vec!["a", "c"]);
    assert_eq!(out[0].hits, 17);
    assert_eq!(out[0].invocations, 170);
  }

  #[test]
  fn two_call_sites_merge_into_one() {
    let out = dedup(vec![event("e1", Some("C"), 10), event("e2", Some("C"), 20)], true);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].hits, 30);
    assert_eq!(out[0].similar_ids.len(), 1);
    assert_eq!(out[0].id(), "e2");
  }

  #[test]
  fn tie_keeps_first_seen() {
    let out = dedup(vec![event("x", Some("C"), 4), event("y", Some("C"), 4)], true);
    assert_eq!(out[0].id(), "x");
  }

  #[test]
  fn grouping_off_passes_through() {
    let out = dedup(vec![event("e1", Some("C"), 10), event("e2", Some("C"), 20)], false);
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|e| e.similar_ids.is_empty()));
  }

  #[test]
  fn events_without_error_location_are_never_grouped() {
    let out = dedup(vec![event("e1", None, 1), event("e2", None, 2)], true);
    assert_eq!(out.len(), 2);
  }

  #[test]
  fn similar_ids_fold_without_self_or_duplicates() {
    let mut a = event("a", Some("C"), 1);
    a.similar_event_ids = vec!["b".into(), "z".into()];
    let mut b = event("b", Some("C"), 8);
    b.similar_event_ids = vec!["z".into(), "a".into()];
    let out = dedup(vec![a, b], true);
    assert_eq!(out[0].id(), "b");
    assert_eq!(out[0].similar_ids, vec!["a", "z"]);
  }

  #[test]
  fn last_non_null_link_wins() {
    let mut a = event("a", Some("C"), 1);
    a.issue_link = Some("JIRA-1".into());
    let mut b = event("b", Some("C"), 2);
    b.issue_link = Some("JIRA-2".into());
    let c = event("c", Some("C"), 3);
    let out = dedup(vec![a, b, c], true);
    assert_eq!(out[0].issue_link.as_deref(), Some("JIRA-2"));
  }

  #[test]
  fn issues_merge_only_within_kind() {
    let issue = |e: RawEvent, kind: IssueKind, delta: f64| ClassifiedIssue {
      kind,
      subject: IssueSubject::Event(AggregatedEvent::single(e)),
      delta,
    };
    let slow = ClassifiedIssue {
      kind: IssueKind::Slowdown,
      subject: IssueSubject::Transaction(TransactionSlowdown {
        transaction: "GET /".into(),
        state: PerformanceState::Slowing,
        score: 1.5,
      }),
      delta: 1.5,
    };
    let out = dedup_issues(
      vec![
        issue(event("a", Some("C"), 1), IssueKind::Regression, 0.2),
        issue(event("b", Some("C"), 5), IssueKind::Regression, 0.7),
        issue(event("c", Some("C"), 9), IssueKind::NewIssue, 0.0),
        slow.clone(),
      ],
      true,
    );
    assert_eq!(out.len(), 3);
    let reg = out.iter().find(|i| i.kind == IssueKind::Regression).unwrap();
    assert_eq!(reg.event().unwrap().id(), "b");
    assert_eq!(reg.event().unwrap().hits, 6);
    assert_eq!(reg.delta, 0.7);
    assert!(out.contains(&slow));
  }

  #[test]
  fn counter_unions_events_across_keys() {
    let counter = EntryPointCounter::new();
    let shared = counter.clone();
    counter.record(&[event("1", Some("C"), 3)]);
    shared.record(&[event("1", Some("C"), 3), event("2", None, 1)]);
    shared.record(&[event("3", Some("D"), 2), event("4", Some("D"), 5)]);

    let grouped = counter.volume(true);
    assert_eq!(grouped["Servlet1"], 3);
    assert_eq!(grouped["Servlet2"], 1);
    assert_eq!(grouped["Servlet4"], 7);
    assert!(!grouped.contains_key("Servlet3"));

    let flat = counter.volume(false);
    assert_eq!(flat["Servlet3"], 2);
    assert_eq!(flat["Servlet4"], 5);
  }

  fn arb_event() -> impl Strategy<Value = RawEvent> {
    (0u32..1000, prop::option::of(0u8..4), 0u64..1000).prop_map(|(id, class, hits)| {
      let class = class.map(|c| format!("C{c}"));
      event(&id.to_string(), class.as_deref(), hits)
    })
  }

  proptest! {
    #[test]
    fn prop_one_aggregate_per_identity(events in prop::collection::vec(arb_event(), 0..40)) {
      let with_identity: HashSet<EventIdentity> = events.iter().filter_map(EventIdentity::of).collect();
      let without = events.iter().filter(|e| e.error.is_none()).count();
      let total_hits: u64 = events.iter().map(|e| e.hits).sum();

      let out = dedup(events, true);
      prop_assert_eq!(out.len(), with_identity.len() + without);
      prop_assert_eq!(out.iter().map(|e| e.hits).sum::<u64>(), total_hits);
      for agg in &out {
        prop_assert!(!agg.similar_ids.iter().any(|id| id == agg.id()));
      }
    }
  }
}
