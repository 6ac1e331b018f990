//! Tracking backend abstraction.

use chrono::{DateTime, Utc};
use plr_types::PlrResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// One history row or summary: metric name to JSON value.
pub type Record = Map<String, Value>;

/// Identity and configuration of a run, handed to the backend at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Short run id (8 lowercase alphanumerics).
    pub id: String,
    pub project: String,
    pub entity: Option<String>,
    pub display_name: Option<String>,
    pub config: Value,
    pub started_at: DateTime<Utc>,
}

impl RunInfo {
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}

/// Persistence and transport for a run.
///
/// Implementations may talk to the hosted tracking service, write a local
/// run directory for later syncing, or keep everything in memory.
pub trait TrackingBackend: Send + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Register the run. Called once, before anything else.
    fn start_run(&mut self, run: &RunInfo) -> PlrResult<()>;

    /// Append one history row.
    fn log_history(&mut self, row: &Record) -> PlrResult<()>;

    /// Store a file under the run, `name` is a `/`-separated relative path.
    fn upload_file(&mut self, name: &str, contents: &[u8]) -> PlrResult<()>;

    /// Write the final summary and mark the run complete.
    fn finish(&mut self, summary: &Record, exit_code: i32) -> PlrResult<()>;

    /// Local directory holding the run's files, if any.
    fn run_dir(&self) -> Option<&Path> {
        None
    }
}

/// Backend for `WANDB_MODE=disabled`: accepts everything, keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl TrackingBackend for NoopBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    fn start_run(&mut self, _run: &RunInfo) -> PlrResult<()> {
        Ok(())
    }

    fn log_history(&mut self, _row: &Record) -> PlrResult<()> {
        Ok(())
    }

    fn upload_file(&mut self, _name: &str, _contents: &[u8]) -> PlrResult<()> {
        Ok(())
    }

    fn finish(&mut self, _summary: &Record, _exit_code: i32) -> PlrResult<()> {
        Ok(())
    }
}
