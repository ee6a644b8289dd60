//! Parallel slice fetch and merge into ordered time series.
//!
//! Each slice is fetched as its own task on the query pool. Results are
//! merged by the draining side only, keyed by attribution and timestamp, so
//! the outcome does not depend on completion order.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::{GraphQuery, TelemetryApi};
use crate::error::EngineError;
use crate::pool::{Collector, ExecutionMode, Pool, Task, TaskOutput};
use crate::slicer::{self, SliceRequest};
use crate::types::{Attribution, Graph, GraphPoint, TimeRange};

/// Graphs returned for one slice.
#[derive(Debug)]
pub struct SliceOutcome {
  pub index: Option<usize>,
  pub graphs: Vec<Graph>,
}

/// Accumulates slice results for one view.
#[derive(Debug)]
pub struct SliceMerger {
  view_id: String,
  series: BTreeMap<Attribution, BTreeMap<DateTime<Utc>, GraphPoint>>,
  dropped: usize,
}

impl SliceMerger {
  pub fn new(view_id: impl Into<String>) -> Self {
    Self {
      view_id: view_id.into(),
      series: BTreeMap::new(),
      dropped: 0,
    }
  }

  /// Insert or overwrite the graph's points. Returns false if the graph belongs
  /// to another view and was dropped.
  pub fn accept(&mut self, graph: Graph) -> bool {
    if graph.view_id != self.view_id {
      warn!(expected = %self.view_id, got = %graph.view_id, "dropping graph for another view");
      self.dropped += 1;
      return false;
    }
    let points = self.series.entry(graph.attribution).or_default();
    for point in graph.points {
      points.insert(point.timestamp, point);
    }
    true
  }

  pub fn dropped(&self) -> usize {
    self.dropped
  }

  /// One graph per attribution, points ascending. Empty if nothing was usable.
  pub fn finish(self) -> Vec<Graph> {
    let view_id = self.view_id;
    self
      .series
      .into_iter()
      .map(|(attribution, points)| Graph {
        view_id: view_id.clone(),
        attribution,
        points: points.into_values().collect(),
      })
      .collect()
  }
}

/// Fetch every slice and merge per attribution.
///
/// A failing fetch fails the whole batch; "no data" is an empty `Vec`.
pub async fn fetch_and_merge_all<F, Fut>(
  view_id: &str,
  slices: Vec<SliceRequest>,
  pool: &Pool,
  sync: bool,
  fetch: F,
) -> Result<Vec<Graph>, EngineError>
where
  F: Fn(SliceRequest) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Vec<Graph>, EngineError>> + Send + 'static,
{
  let mut collector = Collector::new(pool, ExecutionMode::for_batch(slices.len(), sync));
  let fetch = Arc::new(fetch);

  for slice in slices {
    let fetch = fetch.clone();
    let label = match slice.index {
      Some(i) => format!("{view_id}#{i}"),
      None => view_id.to_string(),
    };
    collector.submit(Task::new(label, move || {
      async move {
        let graphs = fetch(slice).await?;
        Ok::<_, EngineError>(TaskOutput::Slice(SliceOutcome {
          index: slice.index,
          graphs,
        }))
      }
      .boxed()
    }));
  }

  let mut merger = SliceMerger::new(view_id);
  for output in collector.drain().await? {
    let outcome = output.into_slice()?;
    for graph in outcome.graphs {
      merger.accept(graph);
    }
  }
  let dropped = merger.dropped();
  let graphs = merger.finish();
  debug!(view = view_id, graphs = graphs.len(), dropped, "merged slices");
  Ok(graphs)
}

/// Fetch every slice of a single series. `None` when no slice produced usable data.
pub async fn fetch_and_merge<F, Fut>(
  view_id: &str,
  slices: Vec<SliceRequest>,
  pool: &Pool,
  sync: bool,
  fetch: F,
) -> Result<Option<Graph>, EngineError>
where
  F: Fn(SliceRequest) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Option<Graph>, EngineError>> + Send + 'static,
{
  let graphs = fetch_and_merge_all(view_id, slices, pool, sync, move |slice| {
    fetch(slice).map(|r| r.map(|g| g.into_iter().collect::<Vec<_>>()))
  })
  .await?;

  Ok(graphs.into_iter().reduce(|mut acc, g| {
    acc.merge(&g);
    acc
  }))
}

/// Slice `range`, query the API per slice and merge. Upstream errors count as
/// "no data for this slice".
pub async fn fetch_window(
  api: Arc<dyn TelemetryApi>,
  template: GraphQuery,
  range: TimeRange,
  pool: &Pool,
  sync: bool,
) -> Result<Vec<Graph>, EngineError> {
  let slices = slicer::slice(range.from(), range.to(), template.point_count);
  let view_id = template.view_id.clone();
  fetch_and_merge_all(&view_id, slices, pool, sync, move |slice| {
    let api = api.clone();
    let query = GraphQuery {
      from: slice.from,
      to: slice.query_to(),
      point_count: slice.point_count,
      ..template.clone()
    };
    async move {
      match api.fetch_graphs(query).await {
        Ok(graphs) => Ok(graphs),
        Err(e) => {
          warn!(slice = ?slice.index, error = %e, "graph fetch failed, treating slice as empty");
          Ok(Vec::new())
        }
      }
    }
  })
  .await
}
