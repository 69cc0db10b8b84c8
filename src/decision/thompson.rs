//! Thompson Sampling primitives
//!
//! - One Beta(alpha, beta) posterior per topic arm, uninformative prior (1, 1)
//! - Beta draws via two Gamma(shape, 1) draws: `x / (x + y)`
//! - Gamma draws via Marsaglia-Tsang rejection on Box-Muller normals
//! - Binary feedback only: correct -> alpha + 1, incorrect -> beta + 1

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::numeric::{safe_ratio, EPSILON};

// ==================== Constants ====================

/// Maximum iterations for Gamma sampling to prevent infinite loops
const MAX_GAMMA_ITERATIONS: usize = 1000;

/// Maximum recursion depth for Gamma sampling
const MAX_GAMMA_RECURSION: usize = 10;

pub const PRIOR_ALPHA: f64 = 1.0;
pub const PRIOR_BETA: f64 = 1.0;

/// Upper bound for a repaired pseudo-count, keeping `pulls` within `u32`.
const MAX_PSEUDO_COUNT: f64 = 1e9;

// ==================== Arm State ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditArm {
    pub pulls: u32,
    pub cumulative_reward: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BanditArm {
    fn default() -> Self {
        Self {
            pulls: 0,
            cumulative_reward: 0.0,
            alpha: PRIOR_ALPHA,
            beta: PRIOR_BETA,
        }
    }
}

impl BanditArm {
    pub fn average_reward(&self) -> f64 {
        safe_ratio(self.cumulative_reward, self.pulls.max(1) as f64, 0.0)
    }

    /// Posterior mean of the success probability.
    pub fn expected_value(&self) -> f64 {
        safe_ratio(self.alpha, self.alpha + self.beta, 0.5)
    }

    /// Record one pull. The Beta update sees only the binary outcome; the
    /// continuous reward feeds the running averages.
    pub fn record(&mut self, correct: bool, reward: f64) {
        self.pulls = self.pulls.saturating_add(1);
        if reward.is_finite() {
            self.cumulative_reward += reward;
        }
        if correct {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
    }

    /// `alpha + beta == pulls + 2` for arms that started from the prior.
    pub fn is_consistent(&self) -> bool {
        (self.alpha + self.beta - (self.pulls as f64 + PRIOR_ALPHA + PRIOR_BETA)).abs() < 1e-9
            && self.alpha >= PRIOR_ALPHA
            && self.beta >= PRIOR_BETA
    }

    /// Repair a persisted arm so the pseudo-count invariant holds again.
    pub fn repaired(mut self) -> Self {
        if !self.alpha.is_finite() || self.alpha < PRIOR_ALPHA {
            self.alpha = PRIOR_ALPHA;
        }
        if !self.beta.is_finite() || self.beta < PRIOR_BETA {
            self.beta = PRIOR_BETA;
        }
        if !self.cumulative_reward.is_finite() || self.cumulative_reward < 0.0 {
            self.cumulative_reward = 0.0;
        }
        let oversized = self.alpha > MAX_PSEUDO_COUNT || self.beta > MAX_PSEUDO_COUNT;
        if oversized || !self.is_consistent() {
            let alpha = self.alpha.round().clamp(PRIOR_ALPHA, MAX_PSEUDO_COUNT);
            let beta = self.beta.round().clamp(PRIOR_BETA, MAX_PSEUDO_COUNT);
            self.alpha = alpha;
            self.beta = beta;
            self.pulls = (alpha + beta - PRIOR_ALPHA - PRIOR_BETA) as u32;
        }
        self
    }
}

// ==================== Sampler ====================

/// Random source for exploration and posterior sampling.
#[derive(Debug, Clone)]
pub struct BetaSampler {
    rng: ChaCha8Rng,
}

impl BetaSampler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { rng }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(Some(seed))
    }

    pub fn uniform(&mut self) -> f64 {
        self.rng.gen()
    }

    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// Sample from Beta(alpha, beta) using Gamma(alpha) / (Gamma(alpha) + Gamma(beta))
    pub fn sample_beta(&mut self, alpha: f64, beta: f64) -> f64 {
        let a = alpha.max(EPSILON);
        let b = beta.max(EPSILON);

        let x = self.sample_gamma_internal(a, 1.0, 0);
        let y = self.sample_gamma_internal(b, 1.0, 0);

        let sum = x + y;
        if sum > 0.0 && sum.is_finite() {
            (x / sum).clamp(0.0, 1.0)
        } else {
            tracing::debug!(alpha, beta, "degenerate gamma draws, using 0.5");
            0.5
        }
    }

    /// Sample from a Gamma distribution using the Marsaglia-Tsang method
    ///
    /// Reference: Marsaglia, G., & Tsang, W. W. (2000).
    /// "A simple method for generating gamma variables."
    pub fn sample_gamma(&mut self, shape: f64, scale: f64) -> f64 {
        self.sample_gamma_internal(shape, scale, 0)
    }

    fn sample_gamma_internal(&mut self, shape: f64, scale: f64, depth: usize) -> f64 {
        if shape <= 0.0 || !shape.is_finite() {
            return 0.0;
        }

        if depth >= MAX_GAMMA_RECURSION {
            return shape * scale;
        }

        // shape < 1: Gamma(shape) = Gamma(shape + 1) * U^(1/shape)
        if shape < 1.0 {
            let u: f64 = self.rng.gen();
            let u_safe = u.max(EPSILON);
            return self.sample_gamma_internal(1.0 + shape, scale, depth + 1)
                * u_safe.powf(1.0 / shape);
        }

        let d = shape - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();

        for _ in 0..MAX_GAMMA_ITERATIONS {
            let x = self.sample_normal();
            let v_term = 1.0 + c * x;

            if v_term <= 0.0 {
                continue;
            }

            let v = v_term.powi(3);
            let u: f64 = self.rng.gen();
            let x2 = x * x;

            // Fast acceptance check
            if u < 1.0 - 0.0331 * x2 * x2 {
                return d * v * scale;
            }

            if u.max(EPSILON).ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
                return d * v * scale;
            }
        }

        // Iteration limit reached, fall back to the mean
        shape * scale
    }

    /// Standard normal via Box-Muller
    fn sample_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.gen::<f64>().max(EPSILON);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}
