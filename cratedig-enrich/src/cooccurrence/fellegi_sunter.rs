//! Fellegi-Sunter record linkage with expectation-maximization
//!
//! Binary agreement vectors are modelled as a two-class mixture: matches (M)
//! and non-matches (U). Per feature k:
//! - `m[k] = P(agree_k | M)`
//! - `u[k] = P(agree_k | U)`
//!
//! and `lambda = P(M)`. Features are conditionally independent given the class.
//! EM alternates posterior match weights (E-step) with weighted frequency
//! estimates (M-step) until parameters settle.

use crate::error::FitError;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Parameters stay inside [EPSILON, 1 - EPSILON]
const EPSILON: f64 = 1e-4;

const INITIAL_M: f64 = 0.9;
const INITIAL_U: f64 = 0.1;
const INITIAL_LAMBDA: f64 = 0.1;

/// Fit controls
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Convergence threshold on the largest parameter change
    pub tolerance: f64,
    /// Fewer records than this is `InsufficientData`
    pub min_records: usize,
    /// Wall-clock budget
    pub timeout: Duration,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-6,
            min_records: 20,
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Fitted mixture parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FellegiSunterModel {
    pub m: Vec<f64>,
    pub u: Vec<f64>,
    pub lambda: f64,
    pub iterations: usize,
}

impl FellegiSunterModel {
    /// Log-likelihood ratio weight of one agreement pattern
    pub fn match_weight(&self, pattern: &[bool]) -> f64 {
        pattern
            .iter()
            .zip(self.m.iter().zip(self.u.iter()))
            .map(|(&agree, (&m, &u))| {
                if agree {
                    (m / u).ln()
                } else {
                    ((1.0 - m) / (1.0 - u)).ln()
                }
            })
            .sum()
    }

    /// Posterior probability that a pattern is a match
    pub fn match_probability(&self, pattern: &[bool]) -> f64 {
        let prior_odds = (self.lambda / (1.0 - self.lambda)).ln();
        logistic(prior_odds + self.match_weight(pattern))
    }
}

fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn clamp_param(p: f64) -> f64 {
    p.clamp(EPSILON, 1.0 - EPSILON)
}

/// Fit the mixture to agreement patterns
///
/// # Errors
/// - `InsufficientData` below `min_records`
/// - `Degenerate` when every pattern is identical or one class collapses
/// - `NotConverged` when `max_iterations` is exhausted
/// - `TimedOut` when the wall-clock budget is exceeded
/// - `NumericalInstability` when a parameter becomes NaN
pub fn fit(patterns: &[Vec<bool>], options: &FitOptions) -> Result<FellegiSunterModel, FitError> {
    if patterns.len() < options.min_records.max(1) {
        return Err(FitError::InsufficientData {
            records: patterns.len(),
            required: options.min_records,
        });
    }

    let k = patterns[0].len();
    if k == 0 || patterns.iter().any(|p| p.len() != k) {
        return Err(FitError::Degenerate("inconsistent feature vector length".to_string()));
    }
    if patterns.iter().all(|p| p == &patterns[0]) {
        return Err(FitError::Degenerate("all agreement patterns identical".to_string()));
    }

    let started = Instant::now();
    let n = patterns.len() as f64;
    let mut m = vec![INITIAL_M; k];
    let mut u = vec![INITIAL_U; k];
    let mut lambda = INITIAL_LAMBDA;
    let mut weights = vec![0.0; patterns.len()];

    for iteration in 1..=options.max_iterations {
        if started.elapsed() >= options.timeout {
            return Err(FitError::TimedOut(options.timeout));
        }

        // E-step
        let current = FellegiSunterModel {
            m: m.clone(),
            u: u.clone(),
            lambda,
            iterations: iteration,
        };
        for (w, pattern) in weights.iter_mut().zip(patterns) {
            *w = current.match_probability(pattern);
        }

        // M-step
        let match_mass: f64 = weights.iter().sum();
        let non_match_mass = n - match_mass;
        if match_mass < EPSILON || non_match_mass < EPSILON {
            return Err(FitError::Degenerate(format!(
                "class collapsed after {} iterations",
                iteration
            )));
        }

        let mut next_m = vec![0.0; k];
        let mut next_u = vec![0.0; k];
        for (w, pattern) in weights.iter().zip(patterns) {
            for (j, &agree) in pattern.iter().enumerate() {
                if agree {
                    next_m[j] += w;
                    next_u[j] += 1.0 - w;
                }
            }
        }
        for j in 0..k {
            next_m[j] = clamp_param(next_m[j] / match_mass);
            next_u[j] = clamp_param(next_u[j] / non_match_mass);
        }
        let next_lambda = clamp_param(match_mass / n);

        if next_m.iter().chain(next_u.iter()).any(|p| !p.is_finite()) || !next_lambda.is_finite() {
            return Err(FitError::NumericalInstability(format!(
                "non-finite parameter at iteration {}",
                iteration
            )));
        }

        let delta = m
            .iter()
            .zip(&next_m)
            .chain(u.iter().zip(&next_u))
            .map(|(a, b)| (a - b).abs())
            .fold((lambda - next_lambda).abs(), f64::max);

        m = next_m;
        u = next_u;
        lambda = next_lambda;

        if delta < options.tolerance {
            return Ok(orient(FellegiSunterModel {
                m,
                u,
                lambda,
                iterations: iteration,
            }));
        }
    }

    Err(FitError::NotConverged(options.max_iterations))
}

/// Make class M the one with higher agreement rates
fn orient(model: FellegiSunterModel) -> FellegiSunterModel {
    let k = model.m.len() as f64;
    let mean_m = model.m.iter().sum::<f64>() / k;
    let mean_u = model.u.iter().sum::<f64>() / k;
    if mean_m >= mean_u {
        return model;
    }
    FellegiSunterModel {
        m: model.u,
        u: model.m,
        lambda: clamp_param(1.0 - model.lambda),
        iterations: model.iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic() -> Vec<Vec<bool>> {
        let mut patterns = Vec::new();
        // Matches agree on nearly everything
        for i in 0..15 {
            patterns.push(vec![true, true, i % 3 != 0, true, i % 2 == 0]);
        }
        // Non-matches agree on at most one feature
        for i in 0..60 {
            patterns.push((0..5).map(|j| j == i % 6).collect());
        }
        patterns
    }

    #[test]
    fn test_insufficient_data() {
        let patterns = vec![vec![true, false]; 5];
        let err = fit(&patterns, &FitOptions::default()).unwrap_err();
        assert_eq!(err, FitError::InsufficientData { records: 5, required: 20 });
    }

    #[test]
    fn test_identical_patterns_are_degenerate() {
        let patterns = vec![vec![true, false, true]; 30];
        assert!(matches!(
            fit(&patterns, &FitOptions::default()),
            Err(FitError::Degenerate(_))
        ));
    }

    #[test]
    fn test_separates_matches_from_non_matches() {
        let model = fit(&synthetic(), &FitOptions::default()).unwrap();

        let strong = model.match_probability(&[true, true, true, true, false]);
        let weak = model.match_probability(&[false, false, false, false, false]);
        assert!(strong > 0.9, "strong {strong}");
        assert!(weak < 0.1, "weak {weak}");
        assert!(model.lambda > 0.0 && model.lambda < 1.0);
        assert!(model.m.iter().sum::<f64>() > model.u.iter().sum::<f64>());
    }

    #[test]
    fn test_iteration_budget() {
        let options = FitOptions {
            max_iterations: 1,
            tolerance: 0.0,
            ..FitOptions::default()
        };
        assert_eq!(fit(&synthetic(), &options), Err(FitError::NotConverged(1)));
    }

    #[test]
    fn test_zero_timeout() {
        let options = FitOptions {
            timeout: Duration::ZERO,
            ..FitOptions::default()
        };
        assert_eq!(fit(&synthetic(), &options), Err(FitError::TimedOut(Duration::ZERO)));
    }

    #[test]
    fn test_orient_swaps_classes() {
        let swapped = orient(FellegiSunterModel {
            m: vec![0.1, 0.2],
            u: vec![0.8, 0.9],
            lambda: 0.3,
            iterations: 1,
        });
        assert_eq!(swapped.m, vec![0.8, 0.9]);
        assert!((swapped.lambda - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_probability_bounds() {
        let model = fit(&synthetic(), &FitOptions::default()).unwrap();
        for pattern in synthetic() {
            let p = model.match_probability(&pattern);
            assert!((0.0..=1.0).contains(&p));
        }
    }
}
