//! Report engine: orchestrates fetch, partitioning, classification, scoring and
//! ranking for one report request.
//!
//! Report keys run as tasks on the `function` pool; each key fans its slice
//! fetches and determinant partitions out to the `query` pool. Any failing
//! task fails the whole report. Missing data only removes a key from it.

use futures::FutureExt;
use parking_lot::Mutex;
use reliability_score::{compute_explanations, rank, score, ReportKey, ReportKeyKind, ScoredKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{
  EventQuery, GraphQuery, PerformanceCalculator, QueryFilters, RegressionCalculator, TelemetryApi,
};
use crate::cache::ResultCache;
use crate::classifier::{self, Classification, ClassifierInput};
use crate::config::{Config, SettingsRegistry};
use crate::dedup::EntryPointCounter;
use crate::determinant::{self, DeterminantKey, PartitionGraphs, PhasedGraph};
use crate::error::EngineError;
use crate::fingerprint;
use crate::merge;
use crate::normalize;
use crate::pool::{Collector, ExecutionMode, Task, TaskOutput, WorkerPools};
use crate::types::{Graph, InboundReportRequest, RawEvent, ReliabilityReport, ReportInput, ReportRow, TimeRange};

/// Collaborators injected into the engine.
#[derive(Clone)]
pub struct EngineContext {
  pub telemetry: Arc<dyn TelemetryApi>,
  pub regressions: Arc<dyn RegressionCalculator>,
  pub performance: Arc<dyn PerformanceCalculator>,
  pub cache: Arc<dyn ResultCache>,
}

/// Outcome of one report-key task.
#[derive(Debug)]
pub enum KeyOutcome {
  NoData { key: ReportKey },
  Reported(Box<ReportRow>),
}

/// Outcome of one determinant partition of a report key.
#[derive(Debug)]
pub struct PartitionOutcome {
  pub determinant: DeterminantKey,
  pub classification: Classification,
}

pub struct ReportEngine {
  settings: SettingsRegistry,
  ctx: EngineContext,
  pools: Mutex<HashMap<String, WorkerPools>>,
}

impl ReportEngine {
  pub fn new(settings: SettingsRegistry, ctx: EngineContext) -> Self {
    Self {
      settings,
      ctx,
      pools: Mutex::new(HashMap::new()),
    }
  }

  /// Build (or fetch from cache) the ranked report for one request.
  pub async fn run(&self, request: &InboundReportRequest) -> Result<Arc<ReliabilityReport>, EngineError> {
    let started = Instant::now();
    let config = self.settings.for_service(request.service_id.trim())?;
    let input = normalize::normalize(request, &config)?;
    let fp = fingerprint::compute(&input)?;

    if let Some(report) = self.ctx.cache.get(&fp) {
      debug!(service = %input.service_id, fingerprint = %fp, "report cache hit");
      return Ok(report);
    }
    debug!(service = %input.service_id, fingerprint = %fp, "report cache miss");

    let pools = self.pools_for(&input.service_id, &config);
    let job = Arc::new(ReportJob {
      membership: input.group_membership(),
      input,
      config,
      ctx: self.ctx.clone(),
      pools: pools.clone(),
      entry_points: EntryPointCounter::new(),
    });

    let keys = job.input.keys.clone();
    let mut collector = Collector::new(pools.function(), ExecutionMode::for_batch(keys.len(), job.input.sync));
    for key in keys {
      let job = job.clone();
      collector.submit(Task::new(format!("key:{}", key.name), move || {
        async move { job.run_key(key).await.map(TaskOutput::Key) }.boxed()
      }));
    }

    let mut rows = Vec::new();
    for output in collector.drain().await? {
      match output.into_key()? {
        KeyOutcome::Reported(row) => rows.push(*row),
        KeyOutcome::NoData { key } => debug!(key = %key.name, "no data for report key"),
      }
    }

    let requested = job.input.keys.len();
    let rows = rank(rows, job.input.rank_mode, job.input.limit);
    let report = Arc::new(ReliabilityReport {
      service_id: job.input.service_id.clone(),
      fingerprint: fp.to_string(),
      rows,
      entry_point_volume: job.entry_points.volume(job.config.group_by_entry_point),
    });
    self.ctx.cache.put(fp, report.clone());

    info!(
      service = %report.service_id,
      keys = requested,
      rows = report.rows.len(),
      elapsed_ms = started.elapsed().as_millis() as u64,
      "report complete"
    );
    Ok(report)
  }

  fn pools_for(&self, service_id: &str, config: &Config) -> WorkerPools {
    self
      .pools
      .lock()
      .entry(service_id.to_string())
      .or_insert_with(|| WorkerPools::from_config(config))
      .clone()
  }
}

/// Everything one report needs, shared by its key tasks.
struct ReportJob {
  input: ReportInput,
  config: Arc<Config>,
  ctx: EngineContext,
  pools: WorkerPools,
  membership: BTreeMap<String, BTreeSet<String>>,
  entry_points: EntryPointCounter,
}

impl ReportJob {
  async fn run_key(self: Arc<Self>, key: ReportKey) -> Result<KeyOutcome, EngineError> {
    let filters = QueryFilters::for_key(&key, &self.input.app_groups);
    // A deployment is compared against whatever ran before it.
    let baseline_filters = match key.kind {
      ReportKeyKind::Deployment => QueryFilters {
        deployments: Vec::new(),
        ..filters.clone()
      },
      _ => filters.clone(),
    };

    let pool = self.pools.query();
    let (active, baseline, events) = tokio::try_join!(
      merge::fetch_window(
        self.ctx.telemetry.clone(),
        self.graph_query(filters.clone()),
        self.input.active,
        pool,
        self.input.sync,
      ),
      merge::fetch_window(
        self.ctx.telemetry.clone(),
        self.graph_query(baseline_filters),
        self.input.baseline,
        pool,
        self.input.sync,
      ),
      async { Ok::<_, EngineError>(self.fetch_events(filters.clone()).await) },
    )?;

    if active.iter().all(Graph::is_empty) {
      return Ok(KeyOutcome::NoData { key });
    }

    let window = window_minutes(&key, &active, self.input.active);
    let failure_rate = failure_rate(&active);

    let mut fields = self.input.determinants;
    if key.kind == ReportKeyKind::Deployment {
      fields.deployments = false;
    }
    let phased = active
      .into_iter()
      .map(PhasedGraph::active)
      .chain(baseline.into_iter().map(PhasedGraph::baseline))
      .collect();
    let partitions = Arc::new(determinant::partition(phased, &self.membership, fields));
    let events = Arc::new(events);

    let reportable: Vec<DeterminantKey> = partitions
      .iter()
      .filter(|(_, p)| p.is_reportable())
      .map(|(k, _)| k.clone())
      .collect();
    let mut collector = Collector::new(pool, ExecutionMode::for_batch(reportable.len(), self.input.sync));
    for det in reportable {
      let job = self.clone();
      let key = key.clone();
      let partitions = partitions.clone();
      let events = events.clone();
      collector.submit(Task::new(format!("{}:{}", key.name, det), move || {
        async move {
          let classification = job.classify_partition(&key, &partitions, &det, &events);
          Ok::<_, EngineError>(TaskOutput::Partition(PartitionOutcome {
            determinant: det,
            classification,
          }))
        }
        .boxed()
      }));
    }

    let mut classified = Vec::new();
    for output in collector.drain().await? {
      let outcome = output.into_partition()?;
      match outcome.classification {
        Classification::NoData => debug!(key = %key.name, partition = %outcome.determinant, "no regression window"),
        Classification::Classified(issues) => classified.push(issues),
      }
    }
    if classified.is_empty() {
      return Ok(KeyOutcome::NoData { key });
    }
    self.entry_points.record(&events);

    let partition_count = classified.len();
    let issues = classifier::consolidate(classified, &self.config.thresholds, self.config.group_by_entry_point);
    let counts = classifier::count_issues(&issues);
    let breakdown = score(&key, &counts, window, &self.config.score);
    let explanations = compute_explanations(&breakdown);
    debug!(key = %key.name, issues = issues.len(), score = breakdown.final_score, "scored report key");

    Ok(KeyOutcome::Reported(Box::new(ReportRow {
      scored: ScoredKey {
        breakdown,
        failure_rate,
      },
      explanations,
      partitions: partition_count,
      issues,
    })))
  }

  fn classify_partition(
    &self,
    key: &ReportKey,
    partitions: &BTreeMap<DeterminantKey, PartitionGraphs>,
    det: &DeterminantKey,
    events: &[RawEvent],
  ) -> Classification {
    let Some(graphs) = partitions.get(det) else {
      return Classification::NoData;
    };
    let view_id = &self.input.view_id;
    let active = graphs.combined_active(view_id);
    let baseline = determinant::combine(view_id, determinant::baseline_for(partitions, det));
    let input = ClassifierInput {
      determinant: det,
      events,
      active: Some(&active),
      baseline: Some(&baseline),
      thresholds: &self.config.thresholds,
    };
    let performance = match key.kind {
      ReportKeyKind::Tier => None,
      _ => Some(self.ctx.performance.as_ref()),
    };
    classifier::classify(&input, self.ctx.regressions.as_ref(), performance)
  }

  fn graph_query(&self, filters: QueryFilters) -> GraphQuery {
    GraphQuery {
      service_id: self.input.service_id.clone(),
      view_id: self.input.view_id.clone(),
      from: self.input.active.from(),
      to: self.input.active.to(),
      point_count: self.input.points,
      volume_type: self.input.volume_type,
      filters,
    }
  }

  async fn fetch_events(&self, filters: QueryFilters) -> Vec<RawEvent> {
    let query = EventQuery {
      service_id: self.input.service_id.clone(),
      view_id: self.input.view_id.clone(),
      range: self.input.active,
      volume_type: self.input.volume_type,
      filters,
    };
    fetch_events_with_retry(self.ctx.telemetry.as_ref(), query, self.config.event_fetch_retries).await
  }
}

/// The primary event-list fetch: retried a bounded number of times, then
/// logged and treated as empty.
pub async fn fetch_events_with_retry(api: &dyn TelemetryApi, query: EventQuery, retries: u32) -> Vec<RawEvent> {
  let attempts = retries.saturating_add(1);
  for attempt in 1..=attempts {
    match api.fetch_events(query.clone()).await {
      Ok(events) => return events,
      Err(e) if attempt < attempts => {
        warn!(attempt, error = %e, "event fetch failed, retrying")
      }
      Err(e) => warn!(attempt, error = %e, "event fetch failed, continuing without events"),
    }
  }
  Vec::new()
}

/// Minutes a key's counts were observed over. Deployments stop at their last
/// point with traffic.
pub fn window_minutes(key: &ReportKey, active: &[Graph], range: TimeRange) -> u64 {
  let nominal = range.minutes();
  if key.kind != ReportKeyKind::Deployment {
    return nominal;
  }
  let last = active
    .iter()
    .filter_map(Graph::last_active_point)
    .map(|p| p.timestamp)
    .max();
  match last {
    Some(ts) => ((ts - range.from()).num_minutes().max(0) as u64).min(nominal),
    None => nominal,
  }
}

/// Active hits over active invocations; zero without invocations.
pub fn failure_rate(active: &[Graph]) -> f64 {
  let hits: u64 = active.iter().map(Graph::total_hits).sum();
  let invocations: u64 = active.iter().map(Graph::total_invocations).sum();
  if invocations == 0 {
    0.0
  } else {
    hits as f64 / invocations as f64
  }
}
