//! Bucket graphs by determinant key (machine, application or group, deployment)
//! so baseline and active windows are compared per infrastructure slice.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::types::{Attribution, Contributor, DeterminantFields, Graph, GraphPoint};

const SEPARATOR: &str = "|";

/// Partition key. `Empty` collects graphs with no determinant attributes.
///
/// Parts are kept positionally so an application and a deployment with the
/// same name never collide. An unselected or missing part is `""`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeterminantKey {
  Empty,
  Key {
    machine: String,
    application: String,
    deployment: String,
  },
}

impl DeterminantKey {
  pub fn from_parts(machine: Option<&str>, application: Option<&str>, deployment: Option<&str>) -> Self {
    if machine.is_none() && application.is_none() && deployment.is_none() {
      return Self::Empty;
    }
    Self::Key {
      machine: machine.unwrap_or_default().to_string(),
      application: application.unwrap_or_default().to_string(),
      deployment: deployment.unwrap_or_default().to_string(),
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, Self::Empty)
  }

  /// Same machine and application, any deployment.
  pub fn same_scope(&self, other: &DeterminantKey) -> bool {
    match (self, other) {
      (
        Self::Key {
          machine: m1,
          application: a1,
          ..
        },
        Self::Key {
          machine: m2,
          application: a2,
          ..
        },
      ) => m1 == m2 && a1 == a2,
      _ => false,
    }
  }
}

impl fmt::Display for DeterminantKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Empty => f.write_str("<empty>"),
      Self::Key {
        machine,
        application,
        deployment,
      } => write!(f, "{machine}{SEPARATOR}{application}{SEPARATOR}{deployment}"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Baseline,
  Active,
}

/// A fetched graph tagged with the window it was fetched for.
#[derive(Debug, Clone)]
pub struct PhasedGraph {
  pub phase: Phase,
  pub graph: Graph,
}

impl PhasedGraph {
  pub fn baseline(graph: Graph) -> Self {
    Self {
      phase: Phase::Baseline,
      graph,
    }
  }

  pub fn active(graph: Graph) -> Self {
    Self {
      phase: Phase::Active,
      graph,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct PartitionGraphs {
  pub baseline: Vec<Graph>,
  pub active: Vec<Graph>,
}

impl PartitionGraphs {
  /// A partition without active data cannot be reported on.
  pub fn is_reportable(&self) -> bool {
    !self.active.is_empty()
  }

  pub fn combined_baseline(&self, view_id: &str) -> Graph {
    combine(view_id, &self.baseline)
  }

  pub fn combined_active(&self, view_id: &str) -> Graph {
    combine(view_id, &self.active)
  }
}

/// Primary key plus one key per group alias of the graph's application.
pub fn keys_for(
  attribution: &Attribution,
  membership: &BTreeMap<String, BTreeSet<String>>,
  fields: DeterminantFields,
) -> Vec<DeterminantKey> {
  let machine = attribution.machine.as_deref().filter(|_| fields.machines);
  let application = attribution.application.as_deref().filter(|_| fields.applications);
  let deployment = attribution.deployment.as_deref().filter(|_| fields.deployments);

  let mut keys = vec![DeterminantKey::from_parts(machine, application, deployment)];
  if let Some(aliases) = application.and_then(|app| membership.get(app)) {
    for alias in aliases {
      keys.push(DeterminantKey::from_parts(machine, Some(alias.as_str()), deployment));
    }
  }
  keys
}

/// Bucket graphs by determinant key. Point-less active graphs are discarded.
pub fn partition(
  graphs: Vec<PhasedGraph>,
  membership: &BTreeMap<String, BTreeSet<String>>,
  fields: DeterminantFields,
) -> BTreeMap<DeterminantKey, PartitionGraphs> {
  let mut out: BTreeMap<DeterminantKey, PartitionGraphs> = BTreeMap::new();

  for PhasedGraph { phase, graph } in graphs {
    if phase == Phase::Active && graph.is_empty() {
      continue;
    }
    for key in keys_for(&graph.attribution, membership, fields) {
      let bucket = out.entry(key).or_default();
      match phase {
        Phase::Baseline => bucket.baseline.push(graph.clone()),
        Phase::Active => bucket.active.push(graph.clone()),
      }
    }
  }

  debug!(
    partitions = out.len(),
    reportable = out.values().filter(|p| p.is_reportable()).count(),
    "partitioned graphs"
  );
  out
}

/// Baseline graphs for `key`.
///
/// Its own when it has any. Otherwise those of every partition on the same
/// machine and application, so a new deployment is compared against the ones
/// before it. Otherwise those filed under `Empty`.
pub fn baseline_for<'a>(
  partitions: &'a BTreeMap<DeterminantKey, PartitionGraphs>,
  key: &DeterminantKey,
) -> Vec<&'a Graph> {
  if let Some(p) = partitions.get(key).filter(|p| !p.baseline.is_empty()) {
    return p.baseline.iter().collect();
  }
  let siblings: Vec<&Graph> = partitions
    .iter()
    .filter(|(k, _)| *k != key && k.same_scope(key))
    .flat_map(|(_, p)| p.baseline.iter())
    .collect();
  if !siblings.is_empty() {
    debug!(partition = %key, graphs = siblings.len(), "baseline taken from sibling deployments");
    return siblings;
  }
  partitions
    .get(&DeterminantKey::Empty)
    .map(|p| p.baseline.iter().collect())
    .unwrap_or_default()
}

/// Sum distinct graphs of one partition into a single series.
///
/// Unlike [`Graph::merge`], stats for the same source at the same timestamp
/// add up, since each input graph measured different infrastructure.
pub fn combine<'a>(view_id: &str, graphs: impl IntoIterator<Item = &'a Graph>) -> Graph {
  let mut by_ts: BTreeMap<DateTime<Utc>, BTreeMap<&str, (u64, u64)>> = BTreeMap::new();
  for graph in graphs {
    for point in &graph.points {
      let sources = by_ts.entry(point.timestamp).or_default();
      for c in &point.contributors {
        let slot = sources.entry(c.source_id.as_str()).or_default();
        slot.0 += c.hits;
        slot.1 += c.invocations;
      }
    }
  }
  let points = by_ts
    .into_iter()
    .map(|(timestamp, sources)| GraphPoint {
      timestamp,
      contributors: sources
        .into_iter()
        .map(|(source_id, (hits, invocations))| Contributor {
          source_id: source_id.to_string(),
          hits,
          invocations,
        })
        .collect(),
    })
    .collect();
  Graph {
    view_id: view_id.to_string(),
    attribution: Attribution::default(),
    points,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn ts(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 1, h, 0, 0).unwrap()
  }

  fn attributed(machine: Option<&str>, app: Option<&str>, dep: Option<&str>, hits: u64) -> Graph {
    Graph::new("v")
      .with_attribution(Attribution {
        machine: machine.map(Into::into),
        application: app.map(Into::into),
        deployment: dep.map(Into::into),
      })
      .with_points(vec![GraphPoint::new(ts(1)).with("s1", hits, hits * 10)])
  }

  fn membership() -> BTreeMap<String, BTreeSet<String>> {
    let mut m = BTreeMap::new();
    m.insert(
      "billing".to_string(),
      ["payments".to_string(), "core".to_string()].into_iter().collect(),
    );
    m
  }

  #[test]
  fn key_joins_positionally() {
    let app = DeterminantKey::from_parts(None, Some("x"), None);
    let dep = DeterminantKey::from_parts(None, None, Some("x"));
    assert_ne!(app, dep);
    assert_eq!(app.to_string(), "|x|");
    assert!(DeterminantKey::from_parts(None, None, None).is_empty());
  }

  #[test]
  fn group_membership_fans_out() {
    let keys = keys_for(
      &attributed(None, Some("billing"), Some("v1"), 1).attribution,
      &membership(),
      DeterminantFields::default(),
    );
    assert_eq!(keys.len(), 3);
    assert!(keys.contains(&DeterminantKey::from_parts(None, Some("payments"), Some("v1"))));
    assert!(keys.contains(&DeterminantKey::from_parts(None, Some("core"), Some("v1"))));
  }

  #[test]
  fn unselected_fields_are_ignored() {
    let fields = DeterminantFields {
      machines: false,
      applications: false,
      deployments: true,
    };
    let keys = keys_for(
      &attributed(Some("host-1"), Some("billing"), Some("v1"), 1).attribution,
      &membership(),
      fields,
    );
    assert_eq!(keys, vec![DeterminantKey::from_parts(None, None, Some("v1"))]);
  }

  #[test]
  fn phases_land_in_their_buckets() {
    let graphs = vec![
      PhasedGraph::baseline(attributed(None, Some("search"), None, 2)),
      PhasedGraph::active(attributed(None, Some("search"), None, 5)),
      PhasedGraph::active(attributed(None, None, None, 1)),
    ];
    let parts = partition(graphs, &BTreeMap::new(), DeterminantFields::default());
    let search = &parts[&DeterminantKey::from_parts(None, Some("search"), None)];
    assert_eq!(search.baseline.len(), 1);
    assert_eq!(search.active.len(), 1);
    assert!(parts.contains_key(&DeterminantKey::Empty));
  }

  #[test]
  fn pointless_active_graphs_are_discarded() {
    let empty = Graph::new("v").with_attribution(Attribution {
      application: Some("search".into()),
      ..Attribution::default()
    });
    let graphs = vec![
      PhasedGraph::baseline(attributed(None, Some("search"), None, 2)),
      PhasedGraph::active(empty),
    ];
    let parts = partition(graphs, &BTreeMap::new(), DeterminantFields::default());
    let search = &parts[&DeterminantKey::from_parts(None, Some("search"), None)];
    assert!(search.active.is_empty());
    assert!(!search.is_reportable());
  }

  #[test]
  fn baseline_falls_back_to_empty_partition() {
    let graphs = vec![
      PhasedGraph::baseline(attributed(None, None, None, 9)),
      PhasedGraph::active(attributed(None, Some("search"), None, 5)),
      PhasedGraph::baseline(attributed(None, Some("billing"), None, 2)),
      PhasedGraph::active(attributed(None, Some("billing"), None, 4)),
    ];
    let parts = partition(graphs, &BTreeMap::new(), DeterminantFields::default());
    let search = DeterminantKey::from_parts(None, Some("search"), None);
    let billing = DeterminantKey::from_parts(None, Some("billing"), None);
    assert_eq!(baseline_for(&parts, &search)[0].total_hits(), 9);
    assert_eq!(baseline_for(&parts, &billing)[0].total_hits(), 2);
    assert!(baseline_for(&BTreeMap::new(), &search).is_empty());
  }

  #[test]
  fn new_deployment_uses_earlier_deployment_baseline() {
    let graphs = vec![
      PhasedGraph::baseline(attributed(None, Some("billing"), Some("v1"), 3)),
      PhasedGraph::baseline(attributed(None, Some("search"), Some("v1"), 50)),
      PhasedGraph::active(attributed(None, Some("billing"), Some("v2"), 7)),
    ];
    let parts = partition(graphs, &BTreeMap::new(), DeterminantFields::default());
    let v2 = DeterminantKey::from_parts(None, Some("billing"), Some("v2"));
    let baseline = baseline_for(&parts, &v2);
    assert_eq!(baseline.len(), 1);
    assert_eq!(baseline[0].total_hits(), 3);
  }

  #[test]
  fn scope_ignores_deployment_only() {
    let a = DeterminantKey::from_parts(Some("h1"), Some("billing"), Some("v1"));
    assert!(a.same_scope(&DeterminantKey::from_parts(Some("h1"), Some("billing"), Some("v2"))));
    assert!(!a.same_scope(&DeterminantKey::from_parts(Some("h2"), Some("billing"), Some("v1"))));
    assert!(!a.same_scope(&DeterminantKey::Empty));
  }

  #[test]
  fn combine_sums_distinct_graphs() {
    let p = PartitionGraphs {
      baseline: Vec::new(),
      active: vec![
        attributed(Some("h1"), Some("a"), None, 3),
        attributed(Some("h2"), Some("a"), None, 4),
      ],
    };
    let g = p.combined_active("v");
    assert_eq!(g.points.len(), 1);
    assert_eq!(g.total_hits(), 7);
    assert_eq!(g.total_invocations(), 70);
    assert!(p.combined_baseline("v").is_empty());
  }
}
