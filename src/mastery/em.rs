//! Expectation-Maximization fitter for BKT parameters.
//!
//! E-step: forward filter `P(Mastered_t | obs_1..t)`, then a backward pass
//! giving smoothed `P(Mastered_t | obs_1..T)`. Because mastery is absorbing,
//! the expected learning event at step t is `P(M_{t+1}|all) - P(M_t|all)`.
//!
//! M-step:
//! - learn = E[N→M transitions] / E[time in NotMastered before the last step]
//! - slip  = E[mastered and wrong] / E[mastered]
//! - guess = E[not mastered and right] / E[not mastered]
//! - prior = mean smoothed mastery at the first step
//!
//! Every parameter is clamped to its band after each M-step.

use serde::{Deserialize, Serialize};

use crate::config::{ParamBounds, TracerConfig};
use crate::mastery::bkt::{forward, BktParams};
use crate::numeric::{safe_ratio, EPSILON};

#[derive(Debug, Clone)]
pub struct EmOptions {
    pub initial: BktParams,
    pub bounds: ParamBounds,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub fit_prior: bool,
}

impl Default for EmOptions {
    fn default() -> Self {
        Self {
            initial: BktParams::default(),
            bounds: ParamBounds::default(),
            max_iterations: 20,
            tolerance: 0.001,
            fit_prior: true,
        }
    }
}

impl EmOptions {
    pub fn from_config(config: &TracerConfig) -> Self {
        Self {
            initial: config.defaults,
            bounds: config.bounds,
            max_iterations: config.em_max_iterations,
            tolerance: config.em_tolerance,
            fit_prior: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmFit {
    pub params: BktParams,
    pub iterations: usize,
    pub converged: bool,
    /// Log-likelihood of the data under the returned parameters' last E-step.
    pub log_likelihood: f64,
    pub observations: usize,
}

#[derive(Debug, Default)]
struct ExpectedCounts {
    learn_events: f64,
    learn_opportunities: f64,
    slips: f64,
    mastered: f64,
    guesses: f64,
    not_mastered: f64,
    first_step_mastery: f64,
    sequences: usize,
    log_likelihood: f64,
}

/// Fit one ordered observation sequence.
pub fn train_em(observations: &[bool], options: &EmOptions) -> EmFit {
    train_em_sequences(&[observations], options)
}

/// Fit several independent sequences that share one parameter set.
pub fn train_em_sequences<S: AsRef<[bool]>>(sequences: &[S], options: &EmOptions) -> EmFit {
    let initial = options.initial.clamped(&options.bounds);
    let observations: usize = sequences.iter().map(|s| s.as_ref().len()).sum();
    if observations == 0 {
        return EmFit {
            params: initial,
            iterations: 0,
            converged: false,
            log_likelihood: 0.0,
            observations: 0,
        };
    }

    let mut params = initial;
    let mut iterations = 0;
    let mut converged = false;
    let mut log_likelihood = 0.0;

    while iterations < options.max_iterations {
        iterations += 1;

        let mut counts = ExpectedCounts::default();
        for seq in sequences {
            accumulate(seq.as_ref(), &params, &mut counts);
        }
        log_likelihood = counts.log_likelihood;

        let next = maximize(&counts, &params, options);
        let delta = next.max_abs_diff(&params);
        params = next;

        if delta < options.tolerance {
            converged = true;
            break;
        }
    }

    tracing::debug!(
        iterations,
        converged,
        log_likelihood,
        learn = params.learn,
        slip = params.slip,
        guess = params.guess,
        "EM fit finished"
    );

    EmFit {
        params,
        iterations,
        converged,
        log_likelihood,
        observations,
    }
}

fn accumulate(observations: &[bool], params: &BktParams, counts: &mut ExpectedCounts) {
    let len = observations.len();
    if len == 0 {
        return;
    }

    let pass = forward(params, observations);
    let smoothed = smooth(&pass.filtered, &pass.predicted, params.learn);

    for (t, &correct) in observations.iter().enumerate() {
        let mastered = smoothed[t];
        let not_mastered = 1.0 - mastered;

        counts.mastered += mastered;
        counts.not_mastered += not_mastered;
        if correct {
            counts.guesses += not_mastered;
        } else {
            counts.slips += mastered;
        }

        if t + 1 < len {
            counts.learn_events += (smoothed[t + 1] - mastered).max(0.0);
            counts.learn_opportunities += not_mastered;
        }
    }

    counts.first_step_mastery += smoothed[0];
    counts.sequences += 1;
    counts.log_likelihood += pass.log_likelihood;
}

/// Backward pass over a filtered sequence.
fn smooth(filtered: &[f64], predicted: &[f64], learn: f64) -> Vec<f64> {
    let len = filtered.len();
    let mut smoothed = vec![0.0; len];
    smoothed[len - 1] = filtered[len - 1];

    for t in (0..len - 1).rev() {
        let not_filtered = 1.0 - filtered[t];
        let next_mastered = smoothed[t + 1];
        let next_pred = predicted[t + 1];

        let mut not_mastered = 0.0;
        if 1.0 - next_pred > EPSILON {
            not_mastered += not_filtered * (1.0 - learn) * (1.0 - next_mastered) / (1.0 - next_pred);
        }
        if next_pred > EPSILON {
            not_mastered += not_filtered * learn * next_mastered / next_pred;
        }

        let value = 1.0 - not_mastered;
        smoothed[t] = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            filtered[t]
        };
    }

    smoothed
}

fn maximize(counts: &ExpectedCounts, current: &BktParams, options: &EmOptions) -> BktParams {
    let prior = if options.fit_prior && counts.sequences > 0 {
        counts.first_step_mastery / counts.sequences as f64
    } else {
        current.prior
    };

    BktParams {
        prior,
        learn: safe_ratio(counts.learn_events, counts.learn_opportunities, current.learn),
        slip: safe_ratio(counts.slips, counts.mastered, current.slip),
        guess: safe_ratio(counts.guesses, counts.not_mastered, current.guess),
    }
    .clamped(&options.bounds)
}
