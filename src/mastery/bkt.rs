//! Bayesian Knowledge Tracing primitives.
//!
//! Two hidden states per skill, `Mastered` and `NotMastered`, with a single
//! learning transition NotMastered → Mastered (probability `learn`) and no
//! forgetting. Emissions:
//!
//! | state        | P(correct) |
//! |--------------|------------|
//! | Mastered     | 1 - slip   |
//! | NotMastered  | guess      |

use serde::{Deserialize, Serialize};

use crate::config::{ParamBand, ParamBounds};
use crate::numeric::{clamp_finite, safe_ratio, sanitize_probability, EPSILON};

pub const DEFAULT_PRIOR: f64 = 0.4;
pub const DEFAULT_LEARN: f64 = 0.15;
pub const DEFAULT_SLIP: f64 = 0.1;
pub const DEFAULT_GUESS: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BktParams {
    pub prior: f64,
    pub learn: f64,
    pub slip: f64,
    pub guess: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            prior: DEFAULT_PRIOR,
            learn: DEFAULT_LEARN,
            slip: DEFAULT_SLIP,
            guess: DEFAULT_GUESS,
        }
    }
}

impl BktParams {
    pub fn new(prior: f64, learn: f64, slip: f64, guess: f64) -> Self {
        Self {
            prior,
            learn,
            slip,
            guess,
        }
    }

    /// Every parameter clamped into its band; NaN falls back to the shared
    /// default for that parameter.
    pub fn clamped(&self, bounds: &ParamBounds) -> Self {
        let band = |v: f64, b: ParamBand, fallback: f64| clamp_finite(v, b.min, b.max, fallback);
        Self {
            prior: band(self.prior, bounds.prior, DEFAULT_PRIOR),
            learn: band(self.learn, bounds.learn, DEFAULT_LEARN),
            slip: band(self.slip, bounds.slip, DEFAULT_SLIP),
            guess: band(self.guess, bounds.guess, DEFAULT_GUESS),
        }
    }

    pub fn max_abs_diff(&self, other: &BktParams) -> f64 {
        [
            (self.prior - other.prior).abs(),
            (self.learn - other.learn).abs(),
            (self.slip - other.slip).abs(),
            (self.guess - other.guess).abs(),
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }
}

/// O(1) online mastery step used between refits.
///
/// Not the exact posterior: a correct answer only applies the learning
/// transition, an incorrect one only discounts by `1 - slip`.
pub fn quick_update(mastery: f64, correct: bool, params: &BktParams) -> f64 {
    let m = sanitize_probability(mastery, params.prior);
    let next = if correct {
        m + (1.0 - m) * params.learn
    } else {
        m * (1.0 - params.slip)
    };
    sanitize_probability(next, m)
}

/// Bayes update of P(Mastered) after one observation (before the transition).
pub fn posterior(prior_mastery: f64, correct: bool, params: &BktParams) -> (f64, f64) {
    let m = sanitize_probability(prior_mastery, params.prior);
    let (like_mastered, like_not) = if correct {
        (1.0 - params.slip, params.guess)
    } else {
        (params.slip, 1.0 - params.guess)
    };
    let joint = m * like_mastered;
    let evidence = joint + (1.0 - m) * like_not;
    let post = sanitize_probability(safe_ratio(joint, evidence, m), m);
    (post, evidence.max(EPSILON))
}

/// P(Mastered) at the next opportunity.
pub fn transition(mastery: f64, params: &BktParams) -> f64 {
    sanitize_probability(mastery + (1.0 - mastery) * params.learn, mastery)
}

/// Forward filter over one ordered sequence.
#[derive(Debug, Clone, Default)]
pub struct ForwardPass {
    /// P(Mastered_t | obs_1..t-1)
    pub predicted: Vec<f64>,
    /// P(Mastered_t | obs_1..t)
    pub filtered: Vec<f64>,
    pub log_likelihood: f64,
}

pub fn forward(params: &BktParams, observations: &[bool]) -> ForwardPass {
    let mut pass = ForwardPass {
        predicted: Vec::with_capacity(observations.len()),
        filtered: Vec::with_capacity(observations.len()),
        log_likelihood: 0.0,
    };
    let mut m = params.prior;
    for &correct in observations {
        pass.predicted.push(m);
        let (post, evidence) = posterior(m, correct, params);
        pass.filtered.push(post);
        pass.log_likelihood += evidence.ln();
        m = transition(post, params);
    }
    pass
}

/// Mastery probability at the next opportunity after the whole sequence.
pub fn forward_mastery(params: &BktParams, observations: &[bool]) -> f64 {
    match forward(params, observations).filtered.last() {
        Some(&last) => transition(last, params),
        None => params.prior,
    }
}
