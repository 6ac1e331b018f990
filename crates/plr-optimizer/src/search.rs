//! Search space definitions and parameter sweep strategies.

use plr_types::{PlrResult, SearchError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::tpe::TpeSearch;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as seen by the objective (e.g. "lr").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

impl ParameterKind {
    /// Whether `value` is a legal value for this dimension.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Self::FloatRange { low, high }, ParameterValue::Float(v))
            | (Self::LogUniform { low, high }, ParameterValue::Float(v)) => *v >= *low && *v <= *high,
            (Self::IntRange { low, high }, ParameterValue::Int(v)) => *v >= *low && *v <= *high,
            (Self::Choice { values }, ParameterValue::Json(v)) => values.contains(v),
            _ => false,
        }
    }

    /// Draw one value uniformly (log-uniformly for `LogUniform`).
    pub fn sample<R: Rng>(&self, rng: &mut R) -> ParameterValue {
        match self {
            Self::FloatRange { low, high } => ParameterValue::Float(rng.random_range(*low..=*high)),
            Self::IntRange { low, high } => ParameterValue::Int(rng.random_range(*low..=*high)),
            Self::LogUniform { low, high } => {
                let log_val: f64 = rng.random_range(low.ln()..=high.ln());
                // exp(ln(x)) can land one ulp outside the range
                ParameterValue::Float(log_val.exp().clamp(*low, *high))
            }
            Self::Choice { values } => {
                let idx = rng.random_range(0..values.len());
                ParameterValue::Json(values[idx].clone())
            }
        }
    }
}

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// One full assignment of the search space, keyed by parameter name.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// Render a parameter set as `{gamma: 0.7, lr: 0.01}`.
pub fn format_params(params: &ParameterSet) -> String {
    let body: Vec<String> = params.iter().map(|(k, v)| format!("{k}: {v}")).collect();
    format!("{{{}}}", body.join(", "))
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Check that every range is well formed.
    pub fn validate(&self) -> PlrResult<()> {
        if self.parameters.is_empty() {
            return Err(SearchError::EmptySpace.into());
        }

        for param in &self.parameters {
            let (low, high) = match &param.kind {
                ParameterKind::FloatRange { low, high } => (*low, *high),
                ParameterKind::IntRange { low, high } => (*low as f64, *high as f64),
                ParameterKind::LogUniform { low, high } => {
                    if *low <= 0.0 {
                        return Err(SearchError::InvalidRange {
                            name: param.name.clone(),
                            low: *low,
                            high: *high,
                        }
                        .into());
                    }
                    (*low, *high)
                }
                ParameterKind::Choice { values } => {
                    if values.is_empty() {
                        return Err(SearchError::InvalidRange {
                            name: param.name.clone(),
                            low: 0.0,
                            high: 0.0,
                        }
                        .into());
                    }
                    continue;
                }
            };
            if !(low.is_finite() && high.is_finite()) || low > high {
                return Err(SearchError::InvalidRange {
                    name: param.name.clone(),
                    low,
                    high,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Whether `params` assigns a legal value to every dimension.
    pub fn contains(&self, params: &ParameterSet) -> bool {
        self.parameters.iter().all(|def| {
            params
                .get(&def.name)
                .map(|value| def.kind.contains(value))
                .unwrap_or(false)
        })
    }

    /// Draw a full assignment uniformly.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> ParameterSet {
        self.parameters
            .iter()
            .map(|param| (param.name.clone(), param.kind.sample(rng)))
            .collect()
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous without a natural grid).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { low, high } => (high - low + 1) as usize,
                ParameterKind::Choice { values } => values.len(),
                // Continuous dimensions need explicit step count; not grid-able by default.
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send {
    /// Generate the next batch of parameter combinations to evaluate.
    /// May return fewer than `count` when the strategy is exhausted.
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet>;

    /// Report a completed trial. `loss` is oriented so that lower is better.
    fn report(&mut self, _params: &ParameterSet, _loss: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Sampler selection as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplerKind {
    #[default]
    Tpe,
    Random,
    Grid,
}

impl SamplerKind {
    /// Instantiate the strategy over `space`.
    pub fn build(
        self,
        space: SearchSpace,
        seed: u64,
        grid_steps: usize,
    ) -> PlrResult<Box<dyn SearchStrategy>> {
        space.validate()?;
        Ok(match self {
            SamplerKind::Tpe => Box::new(TpeSearch::new(space, seed)),
            SamplerKind::Random => Box::new(RandomSearch::new(space, seed)),
            SamplerKind::Grid => Box::new(GridSearch::new(space, grid_steps)),
        })
    }
}

impl FromStr for SamplerKind {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tpe" => Ok(SamplerKind::Tpe),
            "random" => Ok(SamplerKind::Random),
            "grid" => Ok(SamplerKind::Grid),
            _ => Err(SearchError::UnknownSampler { name: s.to_string() }),
        }
    }
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerKind::Tpe => write!(f, "tpe"),
            SamplerKind::Random => write!(f, "random"),
            SamplerKind::Grid => write!(f, "grid"),
        }
    }
}

// ---- Grid search ----

/// Exhaustive grid search over discrete parameter combinations.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<ParameterSet>,
}

impl GridSearch {
    /// `float_steps` evenly spaced points per continuous dimension (at least 2).
    pub fn new(space: SearchSpace, float_steps: usize) -> Self {
        let combos = Self::build_grid(&space, float_steps);
        Self { cursor: 0, combos }
    }

    /// Smallest per-axis step count (at least 2) whose continuous grid holds
    /// `n_trials` points, so a short study still moves along every axis.
    pub fn steps_for_budget(space: &SearchSpace, n_trials: usize) -> usize {
        let continuous = space
            .parameters
            .iter()
            .filter(|p| {
                matches!(
                    p.kind,
                    ParameterKind::FloatRange { .. } | ParameterKind::LogUniform { .. }
                )
            })
            .count() as u32;

        let mut steps = 2usize;
        if continuous == 0 {
            return steps;
        }
        while steps
            .checked_pow(continuous)
            .is_some_and(|points| points < n_trials)
        {
            steps += 1;
        }
        steps
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<ParameterSet> {
        let mut axes: Vec<Vec<(&str, ParameterValue)>> = Vec::new();

        for param in &space.parameters {
            let steps = float_steps.max(2);
            let values: Vec<ParameterValue> = match &param.kind {
                ParameterKind::FloatRange { low, high } => (0..steps)
                    .map(|i| {
                        let t = i as f64 / (steps - 1) as f64;
                        ParameterValue::Float(low + t * (high - low))
                    })
                    .collect(),
                ParameterKind::IntRange { low, high } => {
                    (*low..=*high).map(ParameterValue::Int).collect()
                }
                ParameterKind::LogUniform { low, high } => {
                    let log_low = low.ln();
                    let log_high = high.ln();
                    (0..steps)
                        .map(|i| {
                            let t = i as f64 / (steps - 1) as f64;
                            let v = (log_low + t * (log_high - log_low)).exp();
                            ParameterValue::Float(v.clamp(*low, *high))
                        })
                        .collect()
                }
                ParameterKind::Choice { values } => values
                    .iter()
                    .map(|v| ParameterValue::Json(v.clone()))
                    .collect(),
            };
            axes.push(values.into_iter().map(|v| (param.name.as_str(), v)).collect());
        }

        // Cartesian product
        let mut result: Vec<ParameterSet> = vec![ParameterSet::new()];
        for axis in &axes {
            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for (name, value) in axis {
                    let mut combo = existing.clone();
                    combo.insert(name.to_string(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }

        result
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        let end = (self.cursor + count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count).map(|_| self.space.sample(&mut self.rng)).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lr_gamma_space() -> SearchSpace {
        SearchSpace::new()
            .add_log_uniform("lr", 1e-4, 1e-1)
            .add_float("gamma", 0.5, 0.9)
    }

    #[test]
    fn budgeted_grid_varies_every_axis() {
        let space = lr_gamma_space();
        assert_eq!(GridSearch::steps_for_budget(&space, 1), 2);
        assert_eq!(GridSearch::steps_for_budget(&space, 4), 2);
        assert_eq!(GridSearch::steps_for_budget(&space, 5), 3);
        assert_eq!(GridSearch::steps_for_budget(&space, 10), 4);

        let steps = GridSearch::steps_for_budget(&space, 5);
        let mut grid = GridSearch::new(space, steps);
        let first = grid.suggest(5);
        assert_eq!(first.len(), 5);

        let distinct = |name: &str| {
            let mut values: Vec<f64> = first.iter().map(|p| p[name].as_f64().unwrap()).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            values.dedup();
            values.len()
        };
        assert!(distinct("lr") > 1);
        assert!(distinct("gamma") > 1);
    }

    #[test]
    fn budget_ignores_discrete_axes() {
        let space = SearchSpace::new().add_int("layers", 1, 4);
        assert_eq!(GridSearch::steps_for_budget(&space, 50), 2);
    }

    #[test]
    fn grid_search_produces_correct_count() {
        let space = SearchSpace::new()
            .add_int("a", 1, 3) // 3 values
            .add_int("b", 10, 11); // 2 values
        assert_eq!(space.grid_size(), Some(6));

        let mut gs = GridSearch::new(space, 5);
        let batch = gs.suggest(100);
        assert_eq!(batch.len(), 6);
    }

    #[test]
    fn grid_search_cursor_advances() {
        let space = SearchSpace::new().add_int("x", 1, 5); // 5 values
        let mut gs = GridSearch::new(space, 5);
        let first = gs.suggest(3);
        assert_eq!(first.len(), 3);
        let second = gs.suggest(10);
        assert_eq!(second.len(), 2); // only 2 remain
        assert!(gs.suggest(1).is_empty());
    }

    #[test]
    fn grid_over_continuous_space_hits_endpoints() {
        let space = lr_gamma_space();
        let mut gs = GridSearch::new(space.clone(), 3);
        assert_eq!(gs.len(), 9);

        let all = gs.suggest(9);
        assert!(all.iter().all(|p| space.contains(p)));
        let lrs: Vec<f64> = all.iter().filter_map(|p| p["lr"].as_f64()).collect();
        assert!(lrs.iter().any(|&v| (v - 1e-4).abs() < 1e-12));
        assert!(lrs.iter().any(|&v| (v - 1e-1).abs() < 1e-12));
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = lr_gamma_space();
        let mut rs = RandomSearch::new(space.clone(), 7);
        let suggestions = rs.suggest(200);
        assert_eq!(suggestions.len(), 200);

        for params in &suggestions {
            assert!(space.contains(params), "out of bounds: {}", format_params(params));
            match params.get("gamma") {
                Some(ParameterValue::Float(v)) => assert!(*v >= 0.5 && *v <= 0.9),
                other => panic!("unexpected gamma value: {other:?}"),
            }
        }
    }

    #[test]
    fn random_search_is_reproducible() {
        let mut a = RandomSearch::new(lr_gamma_space(), 3);
        let mut b = RandomSearch::new(lr_gamma_space(), 3);
        assert_eq!(a.suggest(5), b.suggest(5));
    }

    #[test]
    fn grid_size_none_for_float_only() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        assert_eq!(space.grid_size(), None);
    }

    #[test]
    fn choice_parameter_works() {
        let space = SearchSpace::new().add_choice(
            "optimizer",
            vec![
                serde_json::json!("adam"),
                serde_json::json!("sgd"),
                serde_json::json!("adadelta"),
            ],
        );
        let mut rs = RandomSearch::new(space, 0);
        let suggestions = rs.suggest(30);
        assert_eq!(suggestions.len(), 30);
        for params in &suggestions {
            match params.get("optimizer") {
                Some(ParameterValue::Json(v)) => {
                    let s = v.as_str().unwrap();
                    assert!(["adam", "sgd", "adadelta"].contains(&s));
                }
                other => panic!("unexpected optimizer value: {other:?}"),
            }
        }
    }

    #[test]
    fn log_uniform_stays_in_bounds() {
        let space = SearchSpace::new().add_log_uniform("lr", 1e-5, 1e-1);
        let mut rs = RandomSearch::new(space, 11);
        for params in &rs.suggest(100) {
            match params.get("lr") {
                Some(ParameterValue::Float(v)) => {
                    assert!(*v >= 1e-5 && *v <= 1e-1, "lr out of bounds: {v}");
                }
                other => panic!("unexpected lr value: {other:?}"),
            }
        }
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        assert!(SearchSpace::new().validate().is_err());
        assert!(SearchSpace::new().add_float("x", 1.0, 0.0).validate().is_err());
        assert!(SearchSpace::new().add_log_uniform("lr", 0.0, 1.0).validate().is_err());
        assert!(SearchSpace::new().add_choice("c", vec![]).validate().is_err());
        assert!(lr_gamma_space().validate().is_ok());
    }

    #[test]
    fn sampler_kind_parsing() {
        assert_eq!("TPE".parse::<SamplerKind>().unwrap(), SamplerKind::Tpe);
        assert_eq!("random".parse::<SamplerKind>().unwrap(), SamplerKind::Random);
        assert_eq!("grid".parse::<SamplerKind>().unwrap(), SamplerKind::Grid);
        assert!("cmaes".parse::<SamplerKind>().is_err());
        assert_eq!(SamplerKind::default().to_string(), "tpe");
    }

    #[test]
    fn params_format_sorted_by_name() {
        let mut params = ParameterSet::new();
        params.insert("lr".into(), ParameterValue::Float(0.01));
        params.insert("gamma".into(), ParameterValue::Float(0.7));
        assert_eq!(format_params(&params), "{gamma: 0.7, lr: 0.01}");
    }
}
