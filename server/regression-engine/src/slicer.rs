//! Split long fetch windows into per-day slices.
//!
//! Mid-length spans (3..=14 days) are cut at UTC midnights: a partial first
//! day, every full day in between, and a partial last day. Partial days only
//! anchor the boundary, so they ask for two points; full days share the
//! requested point budget. Shorter or longer spans are fetched in one piece.

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::debug;

pub const MIN_SLICED_DAYS: i64 = 3;
pub const MAX_SLICED_DAYS: i64 = 14;
pub const BOUNDARY_POINTS: u32 = 2;

/// One fetch window. `[from, to)`; `index` is `None` for an unsliced fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRequest {
  pub from: DateTime<Utc>,
  pub to: DateTime<Utc>,
  pub point_count: u32,
  pub index: Option<usize>,
}

impl SliceRequest {
  /// Inclusive upper bound sent upstream: one minute before the next slice starts.
  pub fn query_to(&self) -> DateTime<Utc> {
    let last_minute = self.to - Duration::minutes(1);
    if last_minute > self.from {
      last_minute
    } else {
      self.to
    }
  }

  pub fn is_sliced(&self) -> bool {
    self.index.is_some()
  }
}

/// Plan the fetch windows for `[from, to)`.
pub fn slice(from: DateTime<Utc>, to: DateTime<Utc>, points_wanted: u32) -> Vec<SliceRequest> {
  let (from, to) = if from <= to { (from, to) } else { (to, from) };
  let days = (to - from).num_days().abs();

  if !(MIN_SLICED_DAYS..=MAX_SLICED_DAYS).contains(&days) {
    return vec![SliceRequest {
      from,
      to,
      point_count: points_wanted,
      index: None,
    }];
  }

  let one_day = Duration::days(1);
  let full_day_points = points_wanted / days as u32 + 1;
  let mut slices = Vec::with_capacity(days as usize + 2);

  let mut cursor = from;
  let first_midnight = start_of_day(from);
  if first_midnight < from {
    let next = first_midnight + one_day;
    slices.push((from, next, BOUNDARY_POINTS));
    cursor = next;
  }
  while cursor + one_day <= to {
    slices.push((cursor, cursor + one_day, full_day_points));
    cursor += one_day;
  }
  if cursor < to {
    slices.push((cursor, to, BOUNDARY_POINTS));
  }

  debug!(%from, %to, days, slices = slices.len(), "sliced fetch window");

  slices
    .into_iter()
    .enumerate()
    .map(|(i, (from, to, point_count))| SliceRequest {
      from,
      to,
      point_count,
      index: Some(i),
    })
    .collect()
}

fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
  ts - Duration::seconds(i64::from(ts.num_seconds_from_midnight()))
    - Duration::nanoseconds(i64::from(ts.nanosecond()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use proptest::prelude::*;

  fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, min, 0).unwrap()
  }

  fn assert_contiguous(slices: &[SliceRequest], from: DateTime<Utc>, to: DateTime<Utc>) {
    assert_eq!(slices.first().unwrap().from, from);
    assert_eq!(slices.last().unwrap().to, to);
    for pair in slices.windows(2) {
      assert_eq!(pair[0].to, pair[1].from);
      assert!(pair[0].from < pair[0].to);
    }
  }

  #[test]
  fn short_span_is_single_slice() {
    let s = slice(at(1, 10, 0), at(2, 10, 0), 24);
    assert_eq!(s.len(), 1);
    assert_eq!(s[0].index, None);
    assert_eq!(s[0].point_count, 24);
  }

  #[test]
  fn long_span_is_single_slice() {
    let s = slice(at(1, 0, 0), at(20, 0, 0), 24);
    assert_eq!(s.len(), 1);
    assert!(!s[0].is_sliced());
  }

  #[test]
  fn zero_length_is_single_slice() {
    let s = slice(at(1, 10, 0), at(1, 10, 0), 24);
    assert_eq!(s.len(), 1);
    assert_eq!(s[0].from, s[0].to);
  }

  #[test]
  fn mid_span_slices_per_day() {
    // 4 days and 6 hours, starting mid-day.
    let from = at(1, 12, 0);
    let to = at(5, 18, 0);
    let s = slice(from, to, 40);
    assert_contiguous(&s, from, to);

    // Partial 1st, full 2nd..5th midnight-to-midnight (3 days), partial 5th.
    assert_eq!(s.len(), 5);
    assert_eq!(s[0].point_count, BOUNDARY_POINTS);
    assert_eq!(s[0].to, at(2, 0, 0));
    for full in &s[1..4] {
      assert_eq!(full.to - full.from, Duration::days(1));
      assert_eq!(full.point_count, 40 / 4 + 1);
    }
    assert_eq!(s[4].from, at(5, 0, 0));
    assert_eq!(s[4].point_count, BOUNDARY_POINTS);
    let indices: Vec<_> = s.iter().map(|x| x.index).collect();
    assert_eq!(indices, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
  }

  #[test]
  fn midnight_aligned_span_has_no_partials() {
    let from = at(1, 0, 0);
    let to = at(4, 0, 0);
    let s = slice(from, to, 30);
    assert_eq!(s.len(), 3);
    assert!(s.iter().all(|x| x.point_count == 11));
    assert_contiguous(&s, from, to);
  }

  #[test]
  fn inverted_bounds_are_reordered() {
    let s = slice(at(5, 0, 0), at(1, 6, 0), 24);
    assert_contiguous(&s, at(1, 6, 0), at(5, 0, 0));
  }

  #[test]
  fn query_to_is_inclusive_minute() {
    let s = slice(at(1, 12, 0), at(5, 0, 0), 24);
    assert_eq!(s[1].query_to(), at(2, 23, 59));
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_slices_cover_range_exactly(
      start_min in 0i64..(60 * 24 * 30),
      span_min in 1i64..(60 * 24 * 20),
      points in 1u32..500,
    ) {
      let base = at(1, 0, 0);
      let from = base + Duration::minutes(start_min);
      let to = from + Duration::minutes(span_min);
      let s = slice(from, to, points);

      prop_assert!(!s.is_empty());
      prop_assert_eq!(s[0].from, from);
      prop_assert_eq!(s[s.len() - 1].to, to);
      for pair in s.windows(2) {
        prop_assert_eq!(pair[0].to, pair[1].from);
      }
      for x in &s {
        prop_assert!(x.from < x.to);
        prop_assert!(x.point_count >= 1);
      }
    }
  }
}
