//! Contracts for the collaborators the engine does not implement: the
//! telemetry query API and the regression / slowdown calculators.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reliability_score::{ReportKey, ReportKeyKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::RegressionThresholds;
use crate::determinant::DeterminantKey;
use crate::error::ApiError;
use crate::types::{Attribution, Graph, PerformanceState, RawEvent, TimeRange, VolumeType};

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Restricts a query to one report key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFilters {
  #[serde(default)]
  pub tier: Option<String>,
  #[serde(default)]
  pub applications: Vec<String>,
  #[serde(default)]
  pub deployments: Vec<String>,
  #[serde(default)]
  pub servers: Vec<String>,
}

impl QueryFilters {
  /// Filters for a report key. An application key naming a group expands to its members.
  pub fn for_key(key: &ReportKey, app_groups: &BTreeMap<String, Vec<String>>) -> Self {
    let mut filters = Self::default();
    match key.kind {
      ReportKeyKind::Tier => filters.tier = Some(key.name.clone()),
      ReportKeyKind::Application => {
        filters.applications = match app_groups.get(&key.name) {
          Some(members) => members.clone(),
          None => vec![key.name.clone()],
        }
      }
      ReportKeyKind::Deployment => filters.deployments = vec![key.name.clone()],
    }
    filters
  }

  /// Whether telemetry measured on `attribution` passes the infrastructure filters.
  pub fn matches(&self, attribution: &Attribution) -> bool {
    fn allowed(list: &[String], value: &Option<String>) -> bool {
      list.is_empty() || value.as_ref().is_some_and(|v| list.contains(v))
    }
    allowed(&self.applications, &attribution.application)
      && allowed(&self.deployments, &attribution.deployment)
      && allowed(&self.servers, &attribution.machine)
  }
}

/// One graph request. `to` is inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQuery {
  pub service_id: String,
  pub view_id: String,
  pub from: DateTime<Utc>,
  pub to: DateTime<Utc>,
  pub point_count: u32,
  pub volume_type: VolumeType,
  pub filters: QueryFilters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
  pub service_id: String,
  pub view_id: String,
  pub range: TimeRange,
  pub volume_type: VolumeType,
  pub filters: QueryFilters,
}

/// The upstream telemetry store.
pub trait TelemetryApi: Send + Sync {
  /// One graph per attribution with data in the queried range.
  fn fetch_graphs(&self, query: GraphQuery) -> BoxFuture<'_, Result<Vec<Graph>, ApiError>>;

  /// Events seen in the queried range, with active-window volume.
  fn fetch_events(&self, query: EventQuery) -> BoxFuture<'_, Result<Vec<RawEvent>, ApiError>>;
}

// ---------------------------------------------------------------------------
// Regression calculator
// ---------------------------------------------------------------------------

pub struct RegressionInput<'a> {
  pub determinant: &'a DeterminantKey,
  pub events: &'a [RawEvent],
  pub active: &'a Graph,
  pub baseline: &'a Graph,
  pub thresholds: &'a RegressionThresholds,
}

/// Baseline and active failure rates of one event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateChange {
  pub baseline_rate: f64,
  pub active_rate: f64,
}

impl RateChange {
  pub fn delta(&self) -> f64 {
    self.active_rate - self.baseline_rate
  }
}

/// What the regression calculator decided for one partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionVerdict {
  pub new_ids: BTreeSet<String>,
  pub severe_new_ids: BTreeSet<String>,
  pub regressions: BTreeMap<String, RateChange>,
  pub severe_regressions: BTreeMap<String, RateChange>,
}

impl RegressionVerdict {
  pub fn is_new(&self, id: &str) -> bool {
    self.new_ids.contains(id) || self.severe_new_ids.contains(id)
  }

  pub fn is_empty(&self) -> bool {
    self.new_ids.is_empty()
      && self.severe_new_ids.is_empty()
      && self.regressions.is_empty()
      && self.severe_regressions.is_empty()
  }
}

pub trait RegressionCalculator: Send + Sync {
  /// `None` when there is no usable regression window.
  fn evaluate(&self, input: &RegressionInput<'_>) -> Option<RegressionVerdict>;
}

// ---------------------------------------------------------------------------
// Performance calculator
// ---------------------------------------------------------------------------

pub struct PerformanceInput<'a> {
  pub determinant: &'a DeterminantKey,
  pub active: &'a Graph,
  pub baseline: &'a Graph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPerformance {
  pub transaction: String,
  pub state: PerformanceState,
  pub score: f64,
}

pub trait PerformanceCalculator: Send + Sync {
  fn evaluate(&self, input: &PerformanceInput<'_>) -> Vec<TransactionPerformance>;
}
