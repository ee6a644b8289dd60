//! In-memory collaborators replaying recorded telemetry and verdicts.
//!
//! Used by the binary to replay a captured bundle and by tests as fakes.

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::api::{
  EventQuery, GraphQuery, PerformanceCalculator, PerformanceInput, RegressionCalculator,
  RegressionInput, RegressionVerdict, TelemetryApi, TransactionPerformance,
};
use crate::cache::NoCache;
use crate::config::SettingsRegistry;
use crate::engine::{EngineContext, ReportEngine};
use crate::error::{ApiError, EngineError};
use crate::types::{Attribution, Graph, InboundReportRequest, RawEvent};

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedGraph {
  /// Tier the graph was measured for; `None` for infrastructure-level graphs.
  #[serde(default)]
  pub tier: Option<String>,
  #[serde(flatten)]
  pub graph: Graph,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordedEvent {
  #[serde(default)]
  pub tiers: Vec<String>,
  #[serde(default)]
  pub attribution: Attribution,
  #[serde(default)]
  pub last_seen: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub event: RawEvent,
}

/// Telemetry API over recorded graphs and events.
#[derive(Debug, Default, Deserialize)]
pub struct RecordedTelemetry {
  #[serde(default)]
  graphs: Vec<RecordedGraph>,
  #[serde(default)]
  events: Vec<RecordedEvent>,
  #[serde(skip)]
  event_failures: AtomicU32,
  #[serde(skip)]
  graph_calls: AtomicUsize,
  #[serde(skip)]
  event_calls: AtomicUsize,
}

impl RecordedTelemetry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_graph(mut self, tier: Option<&str>, graph: Graph) -> Self {
    self.graphs.push(RecordedGraph {
      tier: tier.map(Into::into),
      graph,
    });
    self
  }

  pub fn with_event(mut self, attribution: Attribution, tiers: &[&str], event: RawEvent) -> Self {
    self.events.push(RecordedEvent {
      tiers: tiers.iter().map(|t| t.to_string()).collect(),
      attribution,
      last_seen: None,
      event,
    });
    self
  }

  /// Make the next `n` event fetches fail as unavailable.
  pub fn with_event_failures(self, n: u32) -> Self {
    self.event_failures.store(n, Ordering::SeqCst);
    self
  }

  pub fn graph_calls(&self) -> usize {
    self.graph_calls.load(Ordering::SeqCst)
  }

  pub fn event_calls(&self) -> usize {
    self.event_calls.load(Ordering::SeqCst)
  }

  fn graphs_for(&self, query: &GraphQuery) -> Vec<Graph> {
    self
      .graphs
      .iter()
      .filter(|g| g.tier == query.filters.tier && query.filters.matches(&g.graph.attribution))
      .filter_map(|g| {
        let points: Vec<_> = g
          .graph
          .points
          .iter()
          .filter(|p| p.timestamp >= query.from && p.timestamp <= query.to)
          .cloned()
          .collect();
        (!points.is_empty()).then(|| Graph {
          view_id: g.graph.view_id.clone(),
          attribution: g.graph.attribution.clone(),
          points,
        })
      })
      .collect()
  }

  fn events_for(&self, query: &EventQuery) -> Vec<RawEvent> {
    self
      .events
      .iter()
      .filter(|e| match &query.filters.tier {
        Some(tier) => e.tiers.contains(tier),
        None => true,
      })
      .filter(|e| query.filters.matches(&e.attribution))
      .filter(|e| e.last_seen.map_or(true, |t| query.range.contains(t)))
      .map(|e| e.event.clone())
      .collect()
  }
}

impl TelemetryApi for RecordedTelemetry {
  fn fetch_graphs(&self, query: GraphQuery) -> BoxFuture<'_, Result<Vec<Graph>, ApiError>> {
    self.graph_calls.fetch_add(1, Ordering::SeqCst);
    future::ready(Ok(self.graphs_for(&query))).boxed()
  }

  fn fetch_events(&self, query: EventQuery) -> BoxFuture<'_, Result<Vec<RawEvent>, ApiError>> {
    self.event_calls.fetch_add(1, Ordering::SeqCst);
    let failing = self
      .event_failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    let result = if failing {
      Err(ApiError::Unavailable {
        reason: "recorded outage".into(),
      })
    } else {
      Ok(self.events_for(&query))
    };
    future::ready(result).boxed()
  }
}

/// Regression verdicts keyed by determinant, with an optional fallback.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecordedRegressions {
  pub default: Option<RegressionVerdict>,
  pub by_partition: BTreeMap<String, RegressionVerdict>,
}

impl RecordedRegressions {
  pub fn uniform(verdict: RegressionVerdict) -> Self {
    Self {
      default: Some(verdict),
      by_partition: BTreeMap::new(),
    }
  }
}

impl RegressionCalculator for RecordedRegressions {
  fn evaluate(&self, input: &RegressionInput<'_>) -> Option<RegressionVerdict> {
    self
      .by_partition
      .get(&input.determinant.to_string())
      .or(self.default.as_ref())
      .cloned()
  }
}

/// Transaction performance keyed by determinant, with a fallback list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecordedPerformance {
  pub default: Vec<TransactionPerformance>,
  pub by_partition: BTreeMap<String, Vec<TransactionPerformance>>,
}

impl PerformanceCalculator for RecordedPerformance {
  fn evaluate(&self, input: &PerformanceInput<'_>) -> Vec<TransactionPerformance> {
    self
      .by_partition
      .get(&input.determinant.to_string())
      .unwrap_or(&self.default)
      .clone()
  }
}

/// A captured report run: settings, request and everything the collaborators returned.
#[derive(Debug, Deserialize)]
pub struct ReplayBundle {
  pub settings: SettingsRegistry,
  pub request: InboundReportRequest,
  #[serde(default)]
  pub telemetry: RecordedTelemetry,
  #[serde(default)]
  pub regressions: RecordedRegressions,
  #[serde(default)]
  pub performance: RecordedPerformance,
}

impl ReplayBundle {
  /// An uncached engine over the recorded collaborators, plus the request to run.
  pub fn into_engine(self) -> Result<(ReportEngine, InboundReportRequest), EngineError> {
    self.settings.validate()?;
    let ctx = EngineContext {
      telemetry: Arc::new(self.telemetry),
      regressions: Arc::new(self.regressions),
      performance: Arc::new(self.performance),
      cache: Arc::new(NoCache),
    };
    Ok((ReportEngine::new(self.settings, ctx), self.request))
  }
}
