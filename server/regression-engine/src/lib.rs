//! Time-windowed regression aggregation engine.
//!
//! Slices long report windows into per-day fetches, runs them on bounded
//! worker pools, merges the results into ordered series, partitions them by
//! infrastructure determinant, classifies new issues, regressions and
//! slowdowns from injected calculator verdicts, and scores and ranks report
//! keys through `reliability-score`.
//!
//! The telemetry API, the calculators and the result cache are injected
//! through [`EngineContext`]; nothing here is global.

pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod determinant;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod merge;
pub mod normalize;
pub mod pool;
pub mod recorded;
pub mod slicer;
pub mod types;

pub use api::{PerformanceCalculator, RegressionCalculator, TelemetryApi};
pub use cache::{InMemoryCache, NoCache, ResultCache};
pub use config::{Config, SettingsRegistry};
pub use engine::{EngineContext, ReportEngine};
pub use error::{ApiError, EngineError};
pub use types::{InboundReportRequest, ReliabilityReport};
