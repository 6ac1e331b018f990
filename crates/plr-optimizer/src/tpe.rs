//! Tree-structured Parzen Estimator sampling.
//!
//! Based on Bergstra et al. (2011), Algorithms for Hyper-Parameter Optimization.
//! The first `n_startup` suggestions are uniform random; afterwards completed
//! trials are split at the `gamma` quantile into "good" and "bad" sets and each
//! dimension is drawn from candidates maximising l(x) / g(x).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;

use crate::search::{ParameterKind, ParameterSet, ParameterValue, SearchSpace, SearchStrategy};

const DEFAULT_STARTUP_TRIALS: usize = 10;
const DEFAULT_GAMMA: f64 = 0.25;
const DEFAULT_CANDIDATES: usize = 24;

#[derive(Debug, Clone)]
pub struct TpeSearch {
    space: SearchSpace,
    gamma: f64,
    n_startup: usize,
    n_candidates: usize,
    observations: Vec<(ParameterSet, f64)>,
    rng: ChaCha8Rng,
}

impl TpeSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            gamma: DEFAULT_GAMMA,
            n_startup: DEFAULT_STARTUP_TRIALS,
            n_candidates: DEFAULT_CANDIDATES,
            observations: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Quantile separating good from bad trials
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(0.01, 0.99);
        self
    }

    /// Number of purely random suggestions before the model kicks in
    pub fn with_startup(mut self, n: usize) -> Self {
        self.n_startup = n.max(1);
        self
    }

    pub fn n_observations(&self) -> usize {
        self.observations.len()
    }

    fn suggest_one(&mut self) -> ParameterSet {
        if self.observations.len() < self.n_startup.max(2) {
            return self.space.sample(&mut self.rng);
        }

        let mut sorted: Vec<&(ParameterSet, f64)> = self.observations.iter().collect();
        sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        let n_good = ((sorted.len() as f64) * self.gamma).ceil() as usize;
        let n_good = n_good.clamp(1, sorted.len() - 1);
        let (good, bad) = sorted.split_at(n_good);
        let good: Vec<&ParameterSet> = good.iter().map(|(p, _)| p).collect();
        let bad: Vec<&ParameterSet> = bad.iter().map(|(p, _)| p).collect();

        let mut params = ParameterSet::new();
        for def in &self.space.parameters {
            let value = sample_dimension(
                &def.name,
                &def.kind,
                &good,
                &bad,
                self.n_candidates,
                &mut self.rng,
            );
            params.insert(def.name.clone(), value);
        }
        params
    }
}

impl SearchStrategy for TpeSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count).map(|_| self.suggest_one()).collect()
    }

    fn report(&mut self, params: &ParameterSet, loss: f64) {
        if loss.is_finite() {
            self.observations.push((params.clone(), loss));
        }
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

fn sample_dimension<R: Rng>(
    name: &str,
    kind: &ParameterKind,
    good: &[&ParameterSet],
    bad: &[&ParameterSet],
    n_candidates: usize,
    rng: &mut R,
) -> ParameterValue {
    match kind {
        ParameterKind::FloatRange { low, high } => {
            let g = float_values(name, good, false);
            let b = float_values(name, bad, false);
            let v = sample_continuous(&g, &b, *low, *high, n_candidates, rng);
            ParameterValue::Float(v.clamp(*low, *high))
        }
        ParameterKind::LogUniform { low, high } => {
            let g = float_values(name, good, true);
            let b = float_values(name, bad, true);
            let v = sample_continuous(&g, &b, low.ln(), high.ln(), n_candidates, rng);
            ParameterValue::Float(v.exp().clamp(*low, *high))
        }
        ParameterKind::IntRange { low, high } => {
            let g: Vec<i64> = good.iter().filter_map(|p| p.get(name)?.as_i64()).collect();
            let b: Vec<i64> = bad.iter().filter_map(|p| p.get(name)?.as_i64()).collect();
            let weights: Vec<f64> = (*low..=*high)
                .map(|v| ratio(count(&g, &v), count(&b, &v)))
                .collect();
            ParameterValue::Int(low + weighted_index(&weights, rng) as i64)
        }
        ParameterKind::Choice { values } => {
            let pick = |set: &[&ParameterSet]| -> Vec<serde_json::Value> {
                set.iter()
                    .filter_map(|p| match p.get(name) {
                        Some(ParameterValue::Json(v)) => Some(v.clone()),
                        _ => None,
                    })
                    .collect()
            };
            let g = pick(good);
            let b = pick(bad);
            let weights: Vec<f64> = values.iter().map(|v| ratio(count(&g, v), count(&b, v))).collect();
            ParameterValue::Json(values[weighted_index(&weights, rng)].clone())
        }
    }
}

fn float_values(name: &str, set: &[&ParameterSet], log_scale: bool) -> Vec<f64> {
    set.iter()
        .filter_map(|p| p.get(name)?.as_f64())
        .map(|v| if log_scale { v.ln() } else { v })
        .collect()
}

fn count<T: PartialEq>(values: &[T], target: &T) -> usize {
    values.iter().filter(|v| *v == target).count()
}

/// Laplace-smoothed l/g ratio
fn ratio(good: usize, bad: usize) -> f64 {
    (good + 1) as f64 / (bad + 1) as f64
}

fn weighted_index<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    let r = rng.random::<f64>() * total;
    let mut cumsum = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumsum += w;
        if r < cumsum {
            return i;
        }
    }
    weights.len().saturating_sub(1)
}

/// Draw candidates around good points and keep the one with the highest
/// l(x) / g(x). `low`/`high` are in the sampling space (log for log-uniform).
fn sample_continuous<R: Rng>(
    good: &[f64],
    bad: &[f64],
    low: f64,
    high: f64,
    n_candidates: usize,
    rng: &mut R,
) -> f64 {
    if good.is_empty() || high <= low {
        return rng.random_range(low..=high);
    }

    let bandwidth = (high - low) / 10.0;
    let mut best_value = low;
    let mut best_score = f64::NEG_INFINITY;

    for _ in 0..n_candidates {
        let base = good[rng.random_range(0..good.len())];
        // Box-Muller
        let u1: f64 = rng.random::<f64>().max(1e-10);
        let u2: f64 = rng.random::<f64>();
        let noise = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos() * bandwidth;
        let candidate = (base + noise).clamp(low, high);

        let score = kde(candidate, good, bandwidth) / (kde(candidate, bad, bandwidth) + 1e-10);
        if score > best_score {
            best_score = score;
            best_value = candidate;
        }
    }

    best_value
}

fn kde(x: f64, values: &[f64], bandwidth: f64) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    values
        .iter()
        .map(|&v| (-(x - v).powi(2) / (2.0 * bandwidth.powi(2))).exp())
        .sum::<f64>()
        / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_log_uniform("lr", 1e-4, 1e-1)
            .add_float("gamma", 0.5, 0.9)
    }

    fn params(lr: f64, gamma: f64) -> ParameterSet {
        let mut p = ParameterSet::new();
        p.insert("lr".into(), ParameterValue::Float(lr));
        p.insert("gamma".into(), ParameterValue::Float(gamma));
        p
    }

    #[test]
    fn startup_phase_is_random_and_in_bounds() {
        let mut tpe = TpeSearch::new(space(), 1);
        let space = space();
        for p in tpe.suggest(20) {
            assert!(space.contains(&p));
        }
        assert_eq!(tpe.n_observations(), 0);
    }

    #[test]
    fn model_phase_stays_in_bounds() {
        let space = space();
        let mut tpe = TpeSearch::new(space.clone(), 5).with_startup(2);
        tpe.report(&params(1e-3, 0.7), 0.05);
        tpe.report(&params(5e-2, 0.5), 0.9);
        tpe.report(&params(1e-4, 0.9), 0.4);
        assert_eq!(tpe.n_observations(), 3);

        for p in tpe.suggest(50) {
            assert!(space.contains(&p), "out of bounds: {p:?}");
        }
    }

    #[test]
    fn model_phase_concentrates_near_good_points() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let mut tpe = TpeSearch::new(space, 9).with_startup(2);
        for i in 0..20 {
            let x = i as f64 / 19.0;
            let mut p = ParameterSet::new();
            p.insert("x".into(), ParameterValue::Float(x));
            // minimum at x = 0.2
            tpe.report(&p, (x - 0.2).powi(2));
        }

        let suggestions = tpe.suggest(40);
        let mean: f64 =
            suggestions.iter().filter_map(|p| p["x"].as_f64()).sum::<f64>() / suggestions.len() as f64;
        assert!(mean < 0.5, "expected suggestions biased toward 0.2, mean {mean}");
    }

    #[test]
    fn non_finite_reports_are_ignored() {
        let mut tpe = TpeSearch::new(space(), 0);
        tpe.report(&params(1e-3, 0.7), f64::NAN);
        assert_eq!(tpe.n_observations(), 0);
    }

    #[test]
    fn discrete_and_choice_dimensions() {
        let space = SearchSpace::new()
            .add_int("layers", 1, 4)
            .add_choice("act", vec![serde_json::json!("relu"), serde_json::json!("gelu")]);
        let mut tpe = TpeSearch::new(space.clone(), 2).with_startup(2);
        for layers in 1..=4 {
            let mut p = ParameterSet::new();
            p.insert("layers".into(), ParameterValue::Int(layers));
            p.insert("act".into(), ParameterValue::Json(serde_json::json!("relu")));
            tpe.report(&p, layers as f64);
        }
        for p in tpe.suggest(20) {
            assert!(space.contains(&p));
        }
    }
}
