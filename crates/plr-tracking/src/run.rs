//! A tracked run: history rows, summary, code snapshot and completion.

use chrono::Utc;
use plr_types::{PlrError, PlrResult, TrackingError};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{Record, RunInfo, TrackingBackend};
use crate::snapshot;

/// Everything needed to start a run
#[derive(Debug, Clone)]
pub struct RunInit {
    pub project: String,
    pub entity: Option<String>,
    pub name: Option<String>,
    /// Full run configuration, recorded once at start
    pub config: Value,
}

impl RunInit {
    pub fn new(project: impl Into<String>, config: Value) -> Self {
        Self {
            project: project.into(),
            entity: None,
            name: None,
            config,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_entity(mut self, entity: Option<String>) -> Self {
        self.entity = entity;
        self
    }
}

#[derive(Debug)]
pub struct Run {
    info: RunInfo,
    backend: Box<dyn TrackingBackend>,
    step: u64,
    started: Instant,
    summary: Record,
    finished: bool,
}

impl Run {
    pub fn init(mut backend: Box<dyn TrackingBackend>, init: RunInit) -> PlrResult<Self> {
        let info = RunInfo {
            id: RunInfo::generate_id(),
            project: init.project,
            entity: init.entity,
            display_name: init.name,
            config: init.config,
            started_at: Utc::now(),
        };

        backend.start_run(&info)?;
        info!(
            "Started run {} in project {} ({} tracking)",
            info.id,
            info.project,
            backend.name()
        );

        Ok(Self {
            info,
            backend,
            step: 0,
            started: Instant::now(),
            summary: Record::new(),
            finished: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    /// Number of rows logged so far
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Last logged value per key
    pub fn summary(&self) -> &Record {
        &self.summary
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn dir(&self) -> Option<&Path> {
        self.backend.run_dir()
    }

    fn ensure_active(&self) -> PlrResult<()> {
        if self.finished {
            return Err(TrackingError::RunFinished {
                run_id: self.info.id.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Append one history row. `metrics` must be a JSON object; `_step`,
    /// `_runtime` and `_timestamp` are added.
    pub fn log(&mut self, metrics: Value) -> PlrResult<()> {
        self.ensure_active()?;

        let Value::Object(mut row) = metrics else {
            return Err(PlrError::Validation(
                "run metrics must be a JSON object".to_string(),
            ));
        };

        for (key, value) in &row {
            self.summary.insert(key.clone(), value.clone());
        }

        let runtime = self.started.elapsed().as_secs_f64();
        let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;
        row.insert("_step".to_string(), json!(self.step));
        row.insert("_runtime".to_string(), json!(runtime));
        row.insert("_timestamp".to_string(), json!(timestamp));

        self.backend.log_history(&row)?;
        self.summary.insert("_step".to_string(), json!(self.step));
        self.summary.insert("_runtime".to_string(), json!(runtime));
        self.step += 1;
        Ok(())
    }

    /// Upload every file under `root` accepted by `include` as
    /// `code/<name>/<relative path>`. Returns the number of files stored.
    pub fn log_code<F>(&mut self, name: &str, root: &Path, include: F) -> PlrResult<usize>
    where
        F: Fn(&Path) -> bool,
    {
        self.ensure_active()?;

        let files = snapshot::collect_files(root, include)?;
        for relative in &files {
            let contents = std::fs::read(root.join(relative))?;
            let upload = format!("code/{}/{}", name, snapshot::upload_name(relative));
            debug!("Snapshotting {}", upload);
            self.backend.upload_file(&upload, &contents)?;
        }

        info!("Saved {} source files from {} to run {}", files.len(), root.display(), self.info.id);
        Ok(files.len())
    }

    /// Flush the summary and close the run. Later calls are no-ops.
    pub fn finish(&mut self) -> PlrResult<()> {
        self.finish_with_code(0)
    }

    pub fn finish_with_code(&mut self, exit_code: i32) -> PlrResult<()> {
        if self.finished {
            return Ok(());
        }
        self.summary
            .insert("_runtime".to_string(), json!(self.started.elapsed().as_secs_f64()));
        self.backend.finish(&self.summary, exit_code)?;
        self.finished = true;

        info!("Run {} finished after {} logged steps", self.info.id, self.step);
        Ok(())
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn local_path(&self, name: &str) -> Option<PathBuf> {
        self.dir().map(|d| d.join(name))
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish_with_code(1) {
                warn!("Failed to close run {}: {}", self.info.id, e);
            }
        }
    }
}
