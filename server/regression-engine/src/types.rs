//! Core types for the regression engine (JSON contracts + internal models).

use chrono::{DateTime, Duration, Utc};
use reliability_score::{RankMode, ReportKey, ScoredKey};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A half-open span `[from, to)` with `from < to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
  from: DateTime<Utc>,
  to: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeRange {
  from: DateTime<Utc>,
  to: DateTime<Utc>,
}

impl TryFrom<RawTimeRange> for TimeRange {
  type Error = EngineError;

  fn try_from(raw: RawTimeRange) -> Result<Self, Self::Error> {
    TimeRange::new(raw.from, raw.to)
  }
}

impl TimeRange {
  pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, EngineError> {
    if from >= to {
      return Err(EngineError::InvalidRange { from, to });
    }
    Ok(Self { from, to })
  }

  pub fn from(&self) -> DateTime<Utc> {
    self.from
  }

  pub fn to(&self) -> DateTime<Utc> {
    self.to
  }

  pub fn duration(&self) -> Duration {
    self.to - self.from
  }

  pub fn minutes(&self) -> u64 {
    self.duration().num_minutes().max(0) as u64
  }

  pub fn contains(&self, ts: DateTime<Utc>) -> bool {
    ts >= self.from && ts < self.to
  }

  /// The `days` immediately before this range.
  pub fn preceding(&self, days: u32) -> Result<Self, EngineError> {
    TimeRange::new(self.from - Duration::days(i64::from(days)), self.from)
  }
}

// ---------------------------------------------------------------------------
// Graphs
// ---------------------------------------------------------------------------

/// Per-source stats inside one graph point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
  pub source_id: String,
  pub hits: u64,
  pub invocations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphPoint {
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub contributors: Vec<Contributor>,
}

impl GraphPoint {
  pub fn new(timestamp: DateTime<Utc>) -> Self {
    Self {
      timestamp,
      contributors: Vec::new(),
    }
  }

  pub fn with(mut self, source_id: &str, hits: u64, invocations: u64) -> Self {
    self.upsert(Contributor {
      source_id: source_id.to_string(),
      hits,
      invocations,
    });
    self
  }

  pub fn hits(&self) -> u64 {
    self.contributors.iter().map(|c| c.hits).sum()
  }

  pub fn invocations(&self) -> u64 {
    self.contributors.iter().map(|c| c.invocations).sum()
  }

  pub fn has_stats(&self) -> bool {
    self.contributors.iter().any(|c| c.hits > 0 || c.invocations > 0)
  }

  /// Insert or replace the stats for one source.
  fn upsert(&mut self, contributor: Contributor) {
    match self
      .contributors
      .iter_mut()
      .find(|c| c.source_id == contributor.source_id)
    {
      Some(existing) => *existing = contributor,
      None => self.contributors.push(contributor),
    }
  }
}

/// Which slice of the infrastructure a graph was measured on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribution {
  #[serde(default)]
  pub machine: Option<String>,
  #[serde(default)]
  pub application: Option<String>,
  #[serde(default)]
  pub deployment: Option<String>,
}

impl Attribution {
  pub fn is_empty(&self) -> bool {
    self.machine.is_none() && self.application.is_none() && self.deployment.is_none()
  }
}

/// A timestamp-ordered series for one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
  pub view_id: String,
  #[serde(default)]
  pub attribution: Attribution,
  #[serde(default)]
  pub points: Vec<GraphPoint>,
}

impl Graph {
  pub fn new(view_id: impl Into<String>) -> Self {
    Self {
      view_id: view_id.into(),
      attribution: Attribution::default(),
      points: Vec::new(),
    }
  }

  pub fn with_attribution(mut self, attribution: Attribution) -> Self {
    self.attribution = attribution;
    self
  }

  pub fn with_points(mut self, points: Vec<GraphPoint>) -> Self {
    self.points = points;
    self.points.sort_by_key(|p| p.timestamp);
    self
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn total_hits(&self) -> u64 {
    self.points.iter().map(GraphPoint::hits).sum()
  }

  pub fn total_invocations(&self) -> u64 {
    self.points.iter().map(GraphPoint::invocations).sum()
  }

  /// Last point that carries any traffic.
  pub fn last_active_point(&self) -> Option<&GraphPoint> {
    self.points.iter().rev().find(|p| p.has_stats())
  }

  /// Fold `other` into this graph.
  ///
  /// Timestamps are unioned; at a shared timestamp contributors are keyed by
  /// source id and the incoming stats replace the existing ones, so merging
  /// the same data twice leaves the graph unchanged.
  pub fn merge(&mut self, other: &Graph) {
    let mut by_ts: BTreeMap<DateTime<Utc>, GraphPoint> =
      self.points.drain(..).map(|p| (p.timestamp, p)).collect();
    for point in &other.points {
      let slot = by_ts
        .entry(point.timestamp)
        .or_insert_with(|| GraphPoint::new(point.timestamp));
      for c in &point.contributors {
        slot.upsert(c.clone());
      }
    }
    self.points = by_ts.into_values().collect();
  }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A code location: class, method and method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
  pub class_name: String,
  pub method_name: String,
  #[serde(default)]
  pub method_desc: String,
}

impl Location {
  pub fn new(class_name: &str, method_name: &str, method_desc: &str) -> Self {
    Self {
      class_name: class_name.to_string(),
      method_name: method_name.to_string(),
      method_desc: method_desc.to_string(),
    }
  }
}

pub const UNCAUGHT_EXCEPTION: &str = "Uncaught Exception";

/// One event as returned by the telemetry API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
  pub id: String,
  /// Event type, e.g. "Logged Error" or "Uncaught Exception".
  #[serde(rename = "type")]
  pub event_type: String,
  /// Exception class or log message name.
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub entry_point: Option<String>,
  #[serde(default)]
  pub origin: Option<Location>,
  #[serde(default)]
  pub error: Option<Location>,
  #[serde(default)]
  pub call_stack_group: Option<String>,
  #[serde(default)]
  pub hits: u64,
  #[serde(default)]
  pub invocations: u64,
  #[serde(default)]
  pub similar_event_ids: Vec<String>,
  #[serde(default)]
  pub issue_link: Option<String>,
}

impl RawEvent {
  pub fn is_uncaught(&self) -> bool {
    self.event_type == UNCAUGHT_EXCEPTION
  }
}

/// One or more raw events that share an identity, presented as a single event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedEvent {
  pub representative: RawEvent,
  /// Ids of the events folded into the representative, without its own id.
  pub similar_ids: Vec<String>,
  pub hits: u64,
  pub invocations: u64,
  pub issue_link: Option<String>,
}

impl AggregatedEvent {
  pub fn single(event: RawEvent) -> Self {
    Self {
      similar_ids: event.similar_event_ids.clone(),
      hits: event.hits,
      invocations: event.invocations,
      issue_link: event.issue_link.clone(),
      representative: event,
    }
  }

  pub fn id(&self) -> &str {
    &self.representative.id
  }
}

// ---------------------------------------------------------------------------
// Classified issues
// ---------------------------------------------------------------------------

/// Issue kinds in display precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
  SevereNewIssue,
  NewIssue,
  SevereRegression,
  Regression,
  SevereSlowdown,
  Slowdown,
}

impl IssueKind {
  pub fn is_new(self) -> bool {
    matches!(self, Self::SevereNewIssue | Self::NewIssue)
  }

  pub fn is_regression(self) -> bool {
    matches!(self, Self::SevereRegression | Self::Regression)
  }

  pub fn is_slowdown(self) -> bool {
    matches!(self, Self::SevereSlowdown | Self::Slowdown)
  }

  pub fn is_severe(self) -> bool {
    matches!(
      self,
      Self::SevereNewIssue | Self::SevereRegression | Self::SevereSlowdown
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PerformanceState {
  Ok,
  Slowing,
  Critical,
}

/// A transaction whose latency moved away from its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSlowdown {
  pub transaction: String,
  pub state: PerformanceState,
  pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "snake_case")]
pub enum IssueSubject {
  Event(AggregatedEvent),
  Transaction(TransactionSlowdown),
}

/// One reportable issue for a report key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedIssue {
  pub kind: IssueKind,
  #[serde(flatten)]
  pub subject: IssueSubject,
  /// Rate delta for regressions, slowdown score for slowdowns, 0 for new issues.
  pub delta: f64,
}

impl ClassifiedIssue {
  pub fn event(&self) -> Option<&AggregatedEvent> {
    match &self.subject {
      IssueSubject::Event(e) => Some(e),
      IssueSubject::Transaction(_) => None,
    }
  }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
  Hits,
  Invocations,
  #[default]
  All,
}

impl VolumeType {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "hits" => Some(Self::Hits),
      "invocations" => Some(Self::Invocations),
      "all" => Some(Self::All),
      _ => None,
    }
  }
}

/// Which attribution fields make up a determinant key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DeterminantFields {
  pub machines: bool,
  pub applications: bool,
  pub deployments: bool,
}

impl Default for DeterminantFields {
  fn default() -> Self {
    Self {
      machines: false,
      applications: true,
      deployments: true,
    }
  }
}

/// One report key as sent by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundReportKey {
  pub name: String,
  pub kind: String,
  #[serde(default)]
  pub is_key: bool,
  #[serde(default)]
  pub weight: Option<u32>,
}

/// A report request as received. Unknown fields are silently ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundReportRequest {
  pub service_id: String,
  pub view_id: String,
  pub from: String,
  pub to: String,
  #[serde(default)]
  pub baseline_days: Option<u32>,
  #[serde(default)]
  pub points: Option<u32>,
  pub keys: Vec<InboundReportKey>,
  #[serde(default)]
  pub determinants: DeterminantFields,
  /// Group alias -> member application names.
  #[serde(default)]
  pub app_groups: BTreeMap<String, Vec<String>>,
  #[serde(default)]
  pub rank_mode: Option<String>,
  #[serde(default)]
  pub limit: Option<usize>,
  #[serde(default)]
  pub volume_type: Option<String>,
  #[serde(default)]
  pub sync: bool,
}

/// A validated report request. Serializes to the form that is fingerprinted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportInput {
  pub service_id: String,
  pub view_id: String,
  pub active: TimeRange,
  pub baseline: TimeRange,
  pub points: u32,
  pub keys: Vec<ReportKey>,
  pub determinants: DeterminantFields,
  pub app_groups: BTreeMap<String, Vec<String>>,
  pub rank_mode: RankMode,
  pub limit: Option<usize>,
  pub volume_type: VolumeType,
  /// Execution hint only; does not change the result.
  #[serde(skip)]
  pub sync: bool,
}

impl ReportInput {
  /// Application name -> group aliases it belongs to.
  pub fn group_membership(&self) -> BTreeMap<String, BTreeSet<String>> {
    let mut membership: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (alias, apps) in &self.app_groups {
      for app in apps {
        membership.entry(app.clone()).or_default().insert(alias.clone());
      }
    }
    membership
  }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One ranked row of the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
  #[serde(flatten)]
  pub scored: ScoredKey,
  pub explanations: Vec<String>,
  pub partitions: usize,
  pub issues: Vec<ClassifiedIssue>,
}

impl Borrow<ScoredKey> for ReportRow {
  fn borrow(&self) -> &ScoredKey {
    &self.scored
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilityReport {
  pub service_id: String,
  pub fingerprint: String,
  pub rows: Vec<ReportRow>,
  /// Active-window hits per entry point across every reported key.
  pub entry_point_volume: BTreeMap<String, u64>,
}

/// Error object written by the binary in place of a report.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
