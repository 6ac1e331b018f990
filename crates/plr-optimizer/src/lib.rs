//! # plr-optimizer
//!
//! Hyperparameter search for the PLR trainer.
//!
//! Provides search space definitions, samplers (grid, random, TPE), trial
//! records and the sequential [`Study`] driver that evaluates an objective
//! over suggested parameter sets.

mod search;
mod study;
mod tpe;
mod trial;

pub use search::{
    format_params, GridSearch, ParameterDef, ParameterKind, ParameterSet, ParameterValue,
    RandomSearch, SamplerKind, SearchSpace, SearchStrategy,
};
pub use study::Study;
pub use tpe::TpeSearch;
pub use trial::{
    ObjectiveDirection, StudyConfig, StudyId, StudyState, StudyStatus, Trial, TrialResult,
    TrialStatus,
};
