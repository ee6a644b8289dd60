//! Result cache keyed by request fingerprint. Eviction is left to the implementation.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::fingerprint::Fingerprint;
use crate::types::ReliabilityReport;

pub trait ResultCache: Send + Sync {
  fn get(&self, key: &Fingerprint) -> Option<Arc<ReliabilityReport>>;
  fn put(&self, key: Fingerprint, report: Arc<ReliabilityReport>);
}

/// Unbounded in-process cache.
#[derive(Debug, Default)]
pub struct InMemoryCache {
  entries: RwLock<HashMap<Fingerprint, Arc<ReliabilityReport>>>,
}

impl InMemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.read().is_empty()
  }
}

impl ResultCache for InMemoryCache {
  fn get(&self, key: &Fingerprint) -> Option<Arc<ReliabilityReport>> {
    self.entries.read().get(key).cloned()
  }

  fn put(&self, key: Fingerprint, report: Arc<ReliabilityReport>) {
    self.entries.write().insert(key, report);
  }
}

/// Never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ResultCache for NoCache {
  fn get(&self, _key: &Fingerprint) -> Option<Arc<ReliabilityReport>> {
    None
  }

  fn put(&self, _key: Fingerprint, _report: Arc<ReliabilityReport>) {}
}
