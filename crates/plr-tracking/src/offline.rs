//! Offline backend: a self-contained run directory under the results dir.
//!
//! Layout:
//!
//! ```text
//! <results>/offline-run-<YYYYmmdd_HHMMSS>-<id>/
//!     metadata.json
//!     config.json
//!     history.jsonl
//!     summary.json
//!     files/
//! ```

use plr_types::{PlrResult, TrackingError};
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::backend::{Record, RunInfo, TrackingBackend};

pub const HISTORY_FILE: &str = "history.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";
pub const CONFIG_FILE: &str = "config.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const FILES_DIR: &str = "files";

#[derive(Debug)]
pub struct OfflineBackend {
    results_dir: PathBuf,
    run_dir: Option<PathBuf>,
    run: Option<RunInfo>,
}

impl OfflineBackend {
    pub fn new<P: AsRef<Path>>(results_dir: P) -> Self {
        Self {
            results_dir: results_dir.as_ref().to_path_buf(),
            run_dir: None,
            run: None,
        }
    }

    fn dir(&self) -> PlrResult<&Path> {
        self.run_dir.as_deref().ok_or_else(|| {
            plr_types::PlrError::Internal("offline run used before start_run".to_string())
        })
    }

    fn write_json(&self, name: &str, value: &serde_json::Value) -> PlrResult<()> {
        let path = self.dir()?.join(name);
        fs::write(&path, serde_json::to_vec_pretty(value)?)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

/// Reject absolute paths and `..` components in uploaded file names.
pub(crate) fn safe_relative(name: &str) -> PlrResult<PathBuf> {
    let path = PathBuf::from(name);
    let ok = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
    if ok {
        Ok(path)
    } else {
        Err(TrackingError::Snapshot {
            message: format!("refusing to store file outside the run directory: {name}"),
        }
        .into())
    }
}

impl TrackingBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn start_run(&mut self, run: &RunInfo) -> PlrResult<()> {
        let stamp = run.started_at.format("%Y%m%d_%H%M%S");
        let dir = self
            .results_dir
            .join(format!("offline-run-{}-{}", stamp, run.id));
        fs::create_dir_all(dir.join(FILES_DIR))?;
        self.run_dir = Some(dir.clone());

        self.write_json(CONFIG_FILE, &run.config)?;
        self.write_json(
            METADATA_FILE,
            &json!({
                "id": run.id,
                "project": run.project,
                "entity": run.entity,
                "display_name": run.display_name,
                "started_at": run.started_at.to_rfc3339(),
            }),
        )?;
        self.run = Some(run.clone());

        info!("Tracking run {} offline in {}", run.id, dir.display());
        Ok(())
    }

    fn log_history(&mut self, row: &Record) -> PlrResult<()> {
        let path = self.dir()?.join(HISTORY_FILE);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(row)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn upload_file(&mut self, name: &str, contents: &[u8]) -> PlrResult<()> {
        let target = self.dir()?.join(FILES_DIR).join(safe_relative(name)?);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, contents)?;
        Ok(())
    }

    fn finish(&mut self, summary: &Record, exit_code: i32) -> PlrResult<()> {
        self.write_json(SUMMARY_FILE, &serde_json::Value::Object(summary.clone()))?;

        if let Some(run) = &self.run {
            self.write_json(
                METADATA_FILE,
                &json!({
                    "id": run.id,
                    "project": run.project,
                    "entity": run.entity,
                    "display_name": run.display_name,
                    "started_at": run.started_at.to_rfc3339(),
                    "finished_at": chrono::Utc::now().to_rfc3339(),
                    "exit_code": exit_code,
                }),
            )?;
        }

        info!("Offline run saved to {}", self.dir()?.display());
        Ok(())
    }

    fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }
}
