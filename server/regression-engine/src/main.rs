//! Binary entrypoint: read one replay bundle from stdin, write one report to stdout.
//!
//! The bundle carries the service settings, the report request and the
//! recorded collaborator responses (see `recorded::ReplayBundle`). On failure an
//! ErrorOutput is written instead and the process exits non-zero.

use regression_engine::recorded::ReplayBundle;
use regression_engine::types::ErrorOutput;
use regression_engine::EngineError;
use std::io::{self, Read, Write};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(io::stderr)
    .init();

  if let Err(e) = run_binary().await {
    tracing::error!(error = %e, "regression-engine failed");
    let err = match &e {
      EngineError::Validation { field, reason } => ErrorOutput::new(reason.clone()).with_field(field.clone()),
      _ => ErrorOutput::new(e.to_string()),
    };
    if let Ok(json) = serde_json::to_vec(&err) {
      let _ = io::stdout().write_all(&json);
    }
    std::process::exit(1);
  }
}

async fn run_binary() -> Result<(), EngineError> {
  let mut raw = String::new();
  io::stdin().lock().read_to_string(&mut raw)?;
  let bundle: ReplayBundle = serde_json::from_str(&raw)?;

  let (engine, request) = bundle.into_engine()?;
  let report = engine.run(&request).await?;
  let json = serde_json::to_vec(report.as_ref())?;
  io::stdout().write_all(&json)?;
  Ok(())
}
