//! # plr-tracking
//!
//! Experiment tracking for the PLR trainer: a [`Run`] records the run
//! configuration, scalar history rows, a source snapshot and a final summary
//! through a pluggable [`TrackingBackend`].
//!
//! Backends:
//!
//! - [`WandbBackend`]: the hosted tracking service (GraphQL + file stream)
//! - [`OfflineBackend`]: a run directory under the results dir
//! - [`MemoryBackend`]: in-process, for tests
//! - [`NoopBackend`]: tracking disabled

pub mod backend;
pub mod memory;
pub mod offline;
pub mod run;
pub mod settings;
pub mod snapshot;
pub mod wandb;

pub use backend::{NoopBackend, Record, RunInfo, TrackingBackend};
pub use memory::{MemoryBackend, MemoryRecord};
pub use offline::OfflineBackend;
pub use run::{Run, RunInit};
pub use settings::{TrackingMode, TrackingSettings};
pub use snapshot::default_include;
pub use wandb::WandbBackend;

use plr_types::PlrResult;
use std::path::Path;
use tracing::warn;

/// Resolve the backend for `settings`.
///
/// Online mode without an API key degrades to offline tracking in
/// `results_dir`; online mode with a key validates it against the service and
/// fails if it is rejected.
pub fn login(settings: &TrackingSettings, results_dir: &Path) -> PlrResult<Box<dyn TrackingBackend>> {
    match settings.effective_mode() {
        TrackingMode::Online => Ok(Box::new(WandbBackend::login(settings, results_dir)?)),
        TrackingMode::Offline => {
            if settings.mode == TrackingMode::Online {
                warn!(
                    "{} is not set; tracking offline in {}",
                    settings::ENV_API_KEY,
                    results_dir.display()
                );
            }
            Ok(Box::new(OfflineBackend::new(results_dir)))
        }
        TrackingMode::Disabled => Ok(Box::new(NoopBackend)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_without_key_goes_offline() {
        let dir = tempfile::tempdir().unwrap();
        let backend = login(&TrackingSettings::default(), dir.path()).unwrap();
        assert_eq!(backend.name(), "offline");
    }

    #[test]
    fn explicit_modes() {
        let dir = tempfile::tempdir().unwrap();
        let offline = TrackingSettings::default()
            .with_api_key("k")
            .with_mode(TrackingMode::Offline);
        assert_eq!(login(&offline, dir.path()).unwrap().name(), "offline");

        let disabled = TrackingSettings::default().with_mode(TrackingMode::Disabled);
        assert_eq!(login(&disabled, dir.path()).unwrap().name(), "disabled");
    }

    #[test]
    fn disabled_run_accepts_everything() {
        let dir = tempfile::tempdir().unwrap();
        let disabled = TrackingSettings::default().with_mode(TrackingMode::Disabled);
        let backend = login(&disabled, dir.path()).unwrap();

        let mut run = Run::init(backend, RunInit::new("plr-project", serde_json::json!({}))).unwrap();
        run.log(serde_json::json!({"epoch": 1})).unwrap();
        run.finish().unwrap();
        assert!(run.dir().is_none());
    }

    #[test]
    fn login_with_key_goes_online() {
        use plr_types::testing::{StubResponse, StubServer};

        let server = StubServer::start(|_, _| {
            StubResponse::json(200, serde_json::json!({"data": {"viewer": {"entity": "lab"}}}))
        })
        .unwrap();
        let mut settings = TrackingSettings::default().with_api_key("k");
        settings.base_url = server.base_url().to_string();

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(login(&settings, dir.path()).unwrap().name(), "online");
        assert_eq!(server.requests().len(), 1);
    }
}
