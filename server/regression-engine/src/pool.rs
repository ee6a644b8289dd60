//! Bounded worker pools and the completion-order task collector.
//!
//! Every API client gets two pools: `query` for slice fetches and determinant
//! sub-tasks, `function` for report-key orchestration. A key task holding a
//! `function` permit never competes with the slice fetches it spawns.
//!
//! Tasks return a [`TaskOutput`]; only the draining caller merges them.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::{KeyOutcome, PartitionOutcome};
use crate::error::EngineError;
use crate::merge::SliceOutcome;

/// A named semaphore bounding concurrent tasks.
#[derive(Debug, Clone)]
pub struct Pool {
  name: &'static str,
  size: usize,
  permits: Arc<Semaphore>,
}

impl Pool {
  pub fn new(name: &'static str, size: usize) -> Self {
    let size = size.max(1);
    Self {
      name,
      size,
      permits: Arc::new(Semaphore::new(size)),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn available(&self) -> usize {
    self.permits.available_permits()
  }
}

/// The pair of pools owned by one API client.
#[derive(Debug, Clone)]
pub struct WorkerPools {
  query: Pool,
  function: Pool,
}

impl WorkerPools {
  pub fn new(query_size: usize, function_size: usize) -> Self {
    Self {
      query: Pool::new("query", query_size),
      function: Pool::new("function", function_size),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.query_pool_size, config.function_pool_size)
  }

  pub fn query(&self) -> &Pool {
    &self.query
  }

  pub fn function(&self) -> &Pool {
    &self.function
  }
}

/// Whether a batch runs on its pool or inline on the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
  Pooled,
  Inline,
}

impl ExecutionMode {
  /// Single tasks and explicitly synchronous requests run inline.
  pub fn for_batch(task_count: usize, sync: bool) -> Self {
    if sync || task_count <= 1 {
      Self::Inline
    } else {
      Self::Pooled
    }
  }
}

/// Result of any task, tagged by the kind of work that produced it.
#[derive(Debug)]
pub enum TaskOutput {
  Slice(SliceOutcome),
  Partition(PartitionOutcome),
  Key(KeyOutcome),
}

impl TaskOutput {
  pub fn variant(&self) -> &'static str {
    match self {
      Self::Slice(_) => "slice",
      Self::Partition(_) => "partition",
      Self::Key(_) => "key",
    }
  }

  pub fn into_slice(self) -> Result<SliceOutcome, EngineError> {
    match self {
      Self::Slice(s) => Ok(s),
      other => Err(unexpected("slice", &other)),
    }
  }

  pub fn into_partition(self) -> Result<PartitionOutcome, EngineError> {
    match self {
      Self::Partition(p) => Ok(p),
      other => Err(unexpected("partition", &other)),
    }
  }

  pub fn into_key(self) -> Result<KeyOutcome, EngineError> {
    match self {
      Self::Key(k) => Ok(k),
      other => Err(unexpected("key", &other)),
    }
  }
}

fn unexpected(expected: &'static str, got: &TaskOutput) -> EngineError {
  EngineError::UnexpectedOutput {
    expected,
    got: got.variant(),
  }
}

pub type TaskFuture = BoxFuture<'static, Result<TaskOutput, EngineError>>;

/// A unit of work. The future is only built once the task holds a permit.
pub struct Task {
  label: String,
  run: Box<dyn FnOnce() -> TaskFuture + Send>,
}

impl Task {
  pub fn new<F>(label: impl Into<String>, run: F) -> Self
  where
    F: FnOnce() -> TaskFuture + Send + 'static,
  {
    Self {
      label: label.into(),
      run: Box::new(run),
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }
}

/// Submits tasks to a pool and drains their outputs in completion order.
///
/// The first failing task fails the batch. Tasks still waiting for a permit
/// at that point never start; tasks already running finish detached.
pub struct Collector {
  pool: Pool,
  mode: ExecutionMode,
  inline: Vec<Task>,
  running: JoinSet<(String, Option<Result<TaskOutput, EngineError>>)>,
  cancelled: Arc<AtomicBool>,
}

impl Collector {
  pub fn new(pool: &Pool, mode: ExecutionMode) -> Self {
    Self {
      pool: pool.clone(),
      mode,
      inline: Vec::new(),
      running: JoinSet::new(),
      cancelled: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn submit(&mut self, task: Task) {
    match self.mode {
      ExecutionMode::Inline => self.inline.push(task),
      ExecutionMode::Pooled => {
        let permits = self.pool.permits.clone();
        let cancelled = self.cancelled.clone();
        self.running.spawn(async move {
          let Task { label, run } = task;
          let _permit = match permits.acquire_owned().await {
            Ok(p) => p,
            Err(_) => return (label, Some(Err(EngineError::PoolClosed))),
          };
          if cancelled.load(Ordering::Acquire) {
            return (label, None);
          }
          let out = run().await;
          (label, Some(out))
        });
      }
    }
  }

  /// Wait for every submitted task.
  pub async fn drain(mut self) -> Result<Vec<TaskOutput>, EngineError> {
    let mut outputs = Vec::new();

    for task in std::mem::take(&mut self.inline) {
      let Task { label, run } = task;
      match run().await {
        Ok(out) => outputs.push(out),
        Err(e) => {
          warn!(pool = self.pool.name, task = %label, error = %e, "inline task failed");
          return Err(e);
        }
      }
    }

    while let Some(joined) = self.running.join_next().await {
      let (label, result) = match joined {
        Ok(r) => r,
        Err(e) => {
          self.cancel();
          return Err(EngineError::Join(e));
        }
      };
      match result {
        Some(Ok(out)) => outputs.push(out),
        Some(Err(e)) => {
          warn!(pool = self.pool.name, task = %label, error = %e, "task failed, stopping batch");
          self.cancel();
          return Err(e);
        }
        None => debug!(pool = self.pool.name, task = %label, "task skipped after cancellation"),
      }
    }

    Ok(outputs)
  }

  fn cancel(&mut self) {
    self.cancelled.store(true, Ordering::Release);
    self.running.detach_all();
  }
}
