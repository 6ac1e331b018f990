//! Trial tracking and study run management.

use chrono::{DateTime, Utc};
use plr_types::{PlrResult, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::search::{ParameterSet, ParameterValue, SamplerKind, SearchSpace};

/// Unique study identifier.
pub type StudyId = Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    #[default]
    Minimize,
}

impl ObjectiveDirection {
    /// Map an objective value onto a lower-is-better scale.
    pub fn as_loss(self, objective: f64) -> f64 {
        match self {
            ObjectiveDirection::Minimize => objective,
            ObjectiveDirection::Maximize => -objective,
        }
    }

    /// Whether `candidate` beats `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            ObjectiveDirection::Maximize => candidate > incumbent,
            ObjectiveDirection::Minimize => candidate < incumbent,
        }
    }
}

/// Top-level configuration for a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub id: StudyId,
    pub name: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    pub sampler: SamplerKind,

    /// Seed for the sampler RNG.
    pub seed: u64,

    /// Metric name the objective returns (e.g. "test_loss").
    pub objective_metric: String,

    /// Direction of optimization.
    pub direction: ObjectiveDirection,

    /// Number of steps per continuous dimension for grid search.
    pub grid_steps: usize,

    pub created_at: DateTime<Utc>,
}

impl StudyConfig {
    pub fn new(name: impl Into<String>, search_space: SearchSpace, sampler: SamplerKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            search_space,
            sampler,
            seed: 0,
            objective_metric: "objective".to_string(),
            direction: ObjectiveDirection::Minimize,
            grid_steps: 5,
            created_at: Utc::now(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_objective(mut self, metric: &str, direction: ObjectiveDirection) -> Self {
        self.objective_metric = metric.to_string();
        self.direction = direction;
        self
    }

    pub fn with_grid_steps(mut self, steps: usize) -> Self {
        self.grid_steps = steps;
        self
    }
}

/// Lifecycle state for a study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyStatus {
    pub id: StudyId,
    pub config: StudyConfig,
    pub state: StudyState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StudyStatus {
    pub fn new(config: StudyConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: StudyState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = StudyState::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self) {
        self.state = StudyState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = StudyState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Update the best trial if `result` improves on the current best.
    /// Non-finite objectives never become best.
    pub fn update_best(&mut self, result: &TrialResult) {
        if !result.objective.is_finite() {
            return;
        }
        let dominated = match &self.best_trial {
            None => true,
            Some(current_best) => self
                .config
                .direction
                .improves(result.objective, current_best.objective),
        };
        if dominated {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one parameter combination evaluated by the objective).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub study_id: StudyId,
    pub number: usize,
    pub parameters: ParameterSet,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(study_id: StudyId, number: usize, parameters: ParameterSet) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id,
            number,
            parameters,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Continuous parameter by name.
    pub fn float(&self, name: &str) -> PlrResult<f64> {
        match self.parameters.get(name) {
            Some(ParameterValue::Float(v)) => Ok(*v),
            Some(ParameterValue::Int(v)) => Ok(*v as f64),
            Some(_) => Err(SearchError::TypeMismatch {
                name: name.to_string(),
                expected: "float".to_string(),
            }
            .into()),
            None => Err(SearchError::UnknownParameter {
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Integer parameter by name.
    pub fn int(&self, name: &str) -> PlrResult<i64> {
        match self.parameters.get(name) {
            Some(ParameterValue::Int(v)) => Ok(*v),
            Some(_) => Err(SearchError::TypeMismatch {
                name: name.to_string(),
                expected: "integer".to_string(),
            }
            .into()),
            None => Err(SearchError::UnknownParameter {
                name: name.to_string(),
            }
            .into()),
        }
    }

    pub fn objective(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.objective)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: TrialResult) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrialStatus::Pending => "PENDING",
            TrialStatus::Running => "RUNNING",
            TrialStatus::Completed => "COMPLETE",
            TrialStatus::Failed => "FAIL",
        };
        write!(f, "{s}")
    }
}

/// Result of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub trial_number: usize,
    pub objective: f64,
    pub metrics: BTreeMap<String, f64>,
    pub parameters: ParameterSet,
    pub duration_seconds: Option<f64>,
}
