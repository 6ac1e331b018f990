//! Sequential trial driver.

use std::collections::BTreeMap;
use std::path::Path;

use plr_types::{PlrError, PlrResult, SearchError};
use tracing::{info, warn};

use crate::search::{format_params, ParameterSet, SearchStrategy};
use crate::trial::{StudyConfig, StudyStatus, Trial, TrialResult, TrialStatus};

/// A study owns its trials, the sampler that proposes them and the running
/// best. Trials are evaluated one at a time in suggestion order.
pub struct Study {
    status: StudyStatus,
    strategy: Box<dyn SearchStrategy>,
    trials: Vec<Trial>,
}

impl std::fmt::Debug for Study {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Study")
            .field("name", &self.status.config.name)
            .field("sampler", &self.strategy.name())
            .field("trials", &self.trials.len())
            .finish()
    }
}

impl Study {
    /// Build the configured sampler and an empty study.
    pub fn create(config: StudyConfig) -> PlrResult<Self> {
        let strategy =
            config
                .sampler
                .build(config.search_space.clone(), config.seed, config.grid_steps)?;
        Ok(Self::with_strategy(config, strategy))
    }

    /// Study driven by a caller-supplied strategy.
    pub fn with_strategy(config: StudyConfig, strategy: Box<dyn SearchStrategy>) -> Self {
        Self {
            status: StudyStatus::new(config),
            strategy,
            trials: Vec::new(),
        }
    }

    pub fn config(&self) -> &StudyConfig {
        &self.status.config
    }

    pub fn status(&self) -> &StudyStatus {
        &self.status
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// Run up to `n_trials` more trials.
    ///
    /// An objective error fails the current trial and is returned to the
    /// caller. A non-finite objective fails the trial and the study moves on.
    /// A sampler that runs dry (grid search) ends the study early.
    pub fn optimize<F>(&mut self, mut objective: F, n_trials: usize) -> PlrResult<()>
    where
        F: FnMut(&Trial) -> PlrResult<f64>,
    {
        self.status.mark_running();

        for _ in 0..n_trials {
            let Some(params) = self.strategy.suggest(1).into_iter().next() else {
                warn!(
                    "Sampler {} exhausted after {} trials",
                    self.strategy.name(),
                    self.trials.len()
                );
                break;
            };

            let number = self.trials.len();
            let mut trial = Trial::new(self.status.id, number, params);
            trial.mark_running();

            match objective(&trial) {
                Ok(value) if value.is_finite() => self.complete(trial, value),
                Ok(value) => {
                    warn!(
                        "Trial {} failed because of the value {} returned by the objective",
                        number, value
                    );
                    trial.mark_failed(format!("objective returned {value}"));
                    self.status.trials_failed += 1;
                    self.trials.push(trial);
                }
                Err(e) => {
                    let message = e.to_string();
                    trial.mark_failed(message.clone());
                    self.status.trials_failed += 1;
                    self.trials.push(trial);
                    self.status.mark_failed(message);
                    return Err(e);
                }
            }
        }

        self.status.mark_completed();
        Ok(())
    }

    fn complete(&mut self, mut trial: Trial, value: f64) {
        let mut metrics = BTreeMap::new();
        metrics.insert(self.status.config.objective_metric.clone(), value);

        trial.mark_completed(TrialResult {
            trial_id: trial.id,
            trial_number: trial.number,
            objective: value,
            metrics,
            parameters: trial.parameters.clone(),
            duration_seconds: None,
        });
        let duration_seconds = trial.duration_seconds();
        if let Some(result) = trial.result.as_mut() {
            result.duration_seconds = duration_seconds;
        }

        let loss = self.status.config.direction.as_loss(value);
        self.strategy.report(&trial.parameters, loss);

        if let Some(result) = &trial.result {
            self.status.update_best(result);
        }
        self.status.trials_completed += 1;

        match &self.status.best_trial {
            Some(best) => info!(
                "Trial {} finished with value {} and parameters {}. Best is trial {} with value {}.",
                trial.number,
                value,
                format_params(&trial.parameters),
                best.trial_number,
                best.objective
            ),
            None => info!(
                "Trial {} finished with value {} and parameters {}.",
                trial.number,
                value,
                format_params(&trial.parameters)
            ),
        }

        self.trials.push(trial);
    }

    /// Best completed trial.
    pub fn best_trial(&self) -> PlrResult<&Trial> {
        let best = self
            .status
            .best_trial
            .as_ref()
            .ok_or(PlrError::Search(SearchError::NoCompletedTrials))?;
        self.trials
            .iter()
            .find(|t| t.id == best.trial_id)
            .ok_or(PlrError::Search(SearchError::NoCompletedTrials))
    }

    pub fn best_value(&self) -> PlrResult<f64> {
        let best = self.best_trial()?;
        best.objective()
            .ok_or(PlrError::Search(SearchError::NoCompletedTrials))
    }

    pub fn best_params(&self) -> PlrResult<&ParameterSet> {
        Ok(&self.best_trial()?.parameters)
    }

    /// Write one row per trial: number, state, value, timing, then one
    /// `params_<name>` column per search dimension.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> PlrResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let names: Vec<&str> = self
            .status
            .config
            .search_space
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect();

        let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;

        let mut header = vec![
            "number".to_string(),
            "state".to_string(),
            "value".to_string(),
            "datetime_start".to_string(),
            "datetime_complete".to_string(),
            "duration_seconds".to_string(),
        ];
        header.extend(names.iter().map(|n| format!("params_{n}")));
        writer.write_record(&header).map_err(csv_error)?;

        for trial in &self.trials {
            let mut row = vec![
                trial.number.to_string(),
                trial.status.to_string(),
                trial.objective().map(|v| v.to_string()).unwrap_or_default(),
                trial.started_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                trial.finished_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                trial
                    .duration_seconds()
                    .map(|d| format!("{d:.3}"))
                    .unwrap_or_default(),
            ];
            row.extend(
                names
                    .iter()
                    .map(|n| trial.parameters.get(*n).map(|v| v.to_string()).unwrap_or_default()),
            );
            writer.write_record(&row).map_err(csv_error)?;
        }

        writer.flush()?;
        info!("Wrote {} trials to {}", self.trials.len(), path.display());
        Ok(())
    }

    /// Number of trials with the given status.
    pub fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|t| t.status == status).count()
    }
}

fn csv_error(e: csv::Error) -> PlrError {
    PlrError::Internal(format!("CSV export failed: {e}"))
}
