//! Stable fingerprint of a report request, used as the result cache key.

use serde::Serialize;
use std::fmt;

use crate::error::EngineError;
use crate::types::ReportInput;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Compute the fingerprint of `{service_id, input}`.
///
/// Hashes the canonical JSON form of the input; every map in it is ordered,
/// so equal inputs always produce equal digests.
pub fn compute(input: &ReportInput) -> Result<Fingerprint, EngineError> {
  let mut hasher = blake3::Hasher::new();
  hasher.update(input.service_id.as_bytes());
  hasher.update(b"|");
  hasher.update(&serde_json::to_vec(input)?);

  let hex = hasher.finalize().to_hex();
  Ok(Fingerprint(hex[..32].to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{DeterminantFields, TimeRange, VolumeType};
  use chrono::{TimeZone, Utc};
  use reliability_score::{RankMode, ReportKey, ReportKeyKind};
  use std::collections::BTreeMap;

  fn input() -> ReportInput {
    let from = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2025, 2, 2, 0, 0, 0).unwrap();
    let active = TimeRange::new(from, to).unwrap();
    ReportInput {
      service_id: "S1".into(),
      view_id: "All Events".into(),
      active,
      baseline: active.preceding(7).unwrap(),
      points: 24,
      keys: vec![ReportKey::new("billing", ReportKeyKind::Application)],
      determinants: DeterminantFields::default(),
      app_groups: BTreeMap::new(),
      rank_mode: RankMode::ByScore,
      limit: None,
      volume_type: VolumeType::All,
      sync: false,
    }
  }

  #[test]
  fn same_input_same_fingerprint() {
    assert_eq!(compute(&input()).unwrap(), compute(&input()).unwrap());
  }

  #[test]
  fn service_changes_fingerprint() {
    let mut other = input();
    other.service_id = "S2".into();
    assert_ne!(compute(&input()).unwrap(), compute(&other).unwrap());
  }

  #[test]
  fn keys_change_fingerprint() {
    let mut other = input();
    other.keys.push(ReportKey::new("v2", ReportKeyKind::Deployment));
    assert_ne!(compute(&input()).unwrap(), compute(&other).unwrap());
  }

  #[test]
  fn sync_hint_is_ignored() {
    let mut other = input();
    other.sync = true;
    assert_eq!(compute(&input()).unwrap(), compute(&other).unwrap());
  }

  #[test]
  fn fingerprint_is_32_hex_chars() {
    let fp = compute(&input()).unwrap();
    assert_eq!(fp.0.len(), 32);
    assert!(fp.0.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
