//! Validate inbound report requests into canonical [`ReportInput`]s.

use chrono::{DateTime, Utc};
use reliability_score::{RankMode, ReportKey, ReportKeyKind};
use std::collections::HashSet;

use crate::config::Config;
use crate::error::EngineError;
use crate::types::{InboundReportKey, InboundReportRequest, ReportInput, TimeRange, VolumeType};

/// Parse and validate a request against the service's settings.
pub fn normalize(raw: &InboundReportRequest, config: &Config) -> Result<ReportInput, EngineError> {
  if raw.service_id.trim().is_empty() {
    return Err(EngineError::validation("service_id", "must not be empty"));
  }
  if raw.view_id.trim().is_empty() {
    return Err(EngineError::validation("view_id", "must not be empty"));
  }

  let from = parse_time("from", &raw.from)?;
  let to = parse_time("to", &raw.to)?;
  let active = TimeRange::new(from, to)?;

  let baseline_days = raw.baseline_days.unwrap_or(config.baseline_days);
  if baseline_days == 0 {
    return Err(EngineError::validation("baseline_days", "must be at least 1"));
  }
  let baseline = active.preceding(baseline_days)?;

  let points = raw.points.unwrap_or(config.default_points);
  if points == 0 {
    return Err(EngineError::validation("points", "must be at least 1"));
  }

  if raw.keys.is_empty() {
    return Err(EngineError::validation("keys", "must name at least one report key"));
  }
  let keys = raw
    .keys
    .iter()
    .map(normalize_key)
    .collect::<Result<Vec<_>, EngineError>>()?;
  let mut seen = HashSet::new();
  for key in &keys {
    if !seen.insert((key.kind, key.name.as_str())) {
      return Err(EngineError::validation(
        "keys",
        &format!("duplicate {:?} key {}", key.kind, key.name),
      ));
    }
  }

  for (alias, members) in &raw.app_groups {
    if alias.trim().is_empty() {
      return Err(EngineError::validation("app_groups", "group alias must not be empty"));
    }
    if members.is_empty() {
      return Err(EngineError::validation(
        "app_groups",
        &format!("group {alias} has no applications"),
      ));
    }
  }

  let rank_mode = match raw.rank_mode.as_deref() {
    None => RankMode::default(),
    Some(s) => match s.to_ascii_lowercase().as_str() {
      "score" | "by_score" => RankMode::ByScore,
      "name" | "by_name" => RankMode::ByName,
      _ => return Err(EngineError::validation("rank_mode", "expected score|name")),
    },
  };

  if raw.limit == Some(0) {
    return Err(EngineError::validation("limit", "must be greater than 0"));
  }

  let volume_type = match raw.volume_type.as_deref() {
    None => VolumeType::default(),
    Some(s) => VolumeType::from_str_loose(s)
      .ok_or_else(|| EngineError::validation("volume_type", "expected hits|invocations|all"))?,
  };

  Ok(ReportInput {
    service_id: raw.service_id.trim().to_string(),
    view_id: raw.view_id.trim().to_string(),
    active,
    baseline,
    points,
    keys,
    determinants: raw.determinants,
    app_groups: raw.app_groups.clone(),
    rank_mode,
    limit: raw.limit,
    volume_type,
    sync: raw.sync,
  })
}

fn parse_time(field: &str, raw: &str) -> Result<DateTime<Utc>, EngineError> {
  DateTime::parse_from_rfc3339(raw)
    .map(|t| t.with_timezone(&Utc))
    .map_err(|e| EngineError::validation(field, &format!("invalid RFC3339: {}", e)))
}

fn normalize_key(raw: &InboundReportKey) -> Result<ReportKey, EngineError> {
  let name = raw.name.trim();
  if name.is_empty() {
    return Err(EngineError::validation("keys[].name", "must not be empty"));
  }
  let kind = ReportKeyKind::from_str_loose(&raw.kind).ok_or_else(|| {
    EngineError::validation("keys[].kind", "expected tier|application|deployment")
  })?;
  let mut key = ReportKey::new(name, kind);
  if raw.is_key {
    key = key.pinned();
  }
  if let Some(weight) = raw.weight {
    key = key.with_weight(weight);
  }
  Ok(key)
}
