//! In-process backend that records everything for inspection.

use parking_lot::Mutex;
use plr_types::PlrResult;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::{Record, RunInfo, TrackingBackend};

/// Everything a run sent to a [`MemoryBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRecord {
    pub run: Option<RunInfo>,
    pub history: Vec<Record>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub summary: Option<Record>,
    pub exit_code: Option<i32>,
    pub finish_calls: usize,
}

/// Clones share the same record, so a test can keep one handle while the
/// run owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of what has been recorded so far
    pub fn record(&self) -> MemoryRecord {
        self.state.lock().clone()
    }
}

impl TrackingBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn start_run(&mut self, run: &RunInfo) -> PlrResult<()> {
        self.state.lock().run = Some(run.clone());
        Ok(())
    }

    fn log_history(&mut self, row: &Record) -> PlrResult<()> {
        self.state.lock().history.push(row.clone());
        Ok(())
    }

    fn upload_file(&mut self, name: &str, contents: &[u8]) -> PlrResult<()> {
        self.state
            .lock()
            .files
            .insert(name.to_string(), contents.to_vec());
        Ok(())
    }

    fn finish(&mut self, summary: &Record, exit_code: i32) -> PlrResult<()> {
        let mut state = self.state.lock();
        state.summary = Some(summary.clone());
        state.exit_code = Some(exit_code);
        state.finish_calls += 1;
        Ok(())
    }
}
