use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::mastery::BktParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityConfig {
    pub learning_rate: f64,
    pub default_discrimination: f64,
    pub theta_min: f64,
    pub theta_max: f64,
}

impl Default for AbilityConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.3,
            default_discrimination: 1.0,
            theta_min: -3.0,
            theta_max: 3.0,
        }
    }
}

/// Valid range for one BKT parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBand {
    pub min: f64,
    pub max: f64,
}

impl ParamBand {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub prior: ParamBand,
    pub learn: ParamBand,
    pub slip: ParamBand,
    pub guess: ParamBand,
}

impl Default for ParamBounds {
    fn default() -> Self {
        Self {
            prior: ParamBand::new(0.01, 0.99),
            learn: ParamBand::new(0.01, 0.3),
            slip: ParamBand::new(0.01, 0.3),
            guess: ParamBand::new(0.01, 0.3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    pub defaults: BktParams,
    pub bounds: ParamBounds,
    /// Observations kept per skill; oldest are dropped first.
    pub max_observations: usize,
    pub min_skill_observations: usize,
    pub min_total_observations: usize,
    pub em_max_iterations: usize,
    pub em_tolerance: f64,
    /// Recorded responses between full refits. 0 disables periodic refits.
    pub refit_interval: u32,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            defaults: BktParams::default(),
            bounds: ParamBounds::default(),
            max_observations: 500,
            min_skill_observations: 5,
            min_total_observations: 20,
            em_max_iterations: 20,
            em_tolerance: 0.001,
            refit_interval: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub initial_epsilon: f64,
    pub epsilon_decay: f64,
    pub min_epsilon: f64,
    pub weakness_weight: f64,
    /// Zone-of-proximal-development offset added to theta when picking difficulty.
    pub zpd_offset: f64,
    pub easy_below: f64,
    pub medium_below: f64,
    /// Response time (seconds) at which the speed bonus reaches zero.
    pub speed_window_seconds: f64,
    pub correct_base_reward: f64,
    pub speed_reward_weight: f64,
    pub history_capacity: usize,
    /// Fixed RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            initial_epsilon: 0.15,
            epsilon_decay: 0.995,
            min_epsilon: 0.0,
            weakness_weight: 0.3,
            zpd_offset: 0.5,
            easy_below: -0.5,
            medium_below: 0.75,
            speed_window_seconds: 120.0,
            correct_base_reward: 0.7,
            speed_reward_weight: 0.3,
            history_capacity: 200,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ability: AbilityConfig,
    pub tracer: TracerConfig,
    pub policy: PolicyConfig,
    /// Named topic groups (e.g. test sections) for scaled-score estimates.
    pub topic_groups: BTreeMap<String, Vec<String>>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse("ADAPTIVE_LEARNING_RATE") {
            config.ability.learning_rate = val;
        }
        if let Some(val) = env_parse("ADAPTIVE_EPSILON") {
            config.policy.initial_epsilon = val;
        }
        if let Some(val) = env_parse("ADAPTIVE_EPSILON_DECAY") {
            config.policy.epsilon_decay = val;
        }
        if let Some(val) = env_parse("ADAPTIVE_WEAKNESS_WEIGHT") {
            config.policy.weakness_weight = val;
        }
        if let Some(val) = env_parse("ADAPTIVE_HISTORY_CAPACITY") {
            config.policy.history_capacity = val;
        }
        if let Some(val) = env_parse("ADAPTIVE_REFIT_INTERVAL") {
            config.tracer.refit_interval = val;
        }
        if let Some(val) = env_parse("ADAPTIVE_SEED") {
            config.policy.seed = Some(val);
        }

        config
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let ability = &self.ability;
        if !(ability.learning_rate.is_finite() && ability.learning_rate > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                ability.learning_rate
            )));
        }
        if !(ability.default_discrimination.is_finite() && ability.default_discrimination > 0.0) {
            return Err(EngineError::InvalidConfig(
                "default_discrimination must be positive".to_string(),
            ));
        }
        if !(ability.theta_min < ability.theta_max) {
            return Err(EngineError::InvalidConfig(
                "theta_min must be below theta_max".to_string(),
            ));
        }

        let policy = &self.policy;
        if !(0.0..=1.0).contains(&policy.initial_epsilon)
            || !(0.0..=1.0).contains(&policy.epsilon_decay)
            || !(0.0..=1.0).contains(&policy.min_epsilon)
        {
            return Err(EngineError::InvalidConfig(
                "epsilon settings must lie in [0, 1]".to_string(),
            ));
        }
        if !(policy.speed_window_seconds.is_finite() && policy.speed_window_seconds > 0.0) {
            return Err(EngineError::InvalidConfig(
                "speed_window_seconds must be positive".to_string(),
            ));
        }
        if !policy.weakness_weight.is_finite() || policy.weakness_weight < 0.0 {
            return Err(EngineError::InvalidConfig(
                "weakness_weight must be non-negative".to_string(),
            ));
        }
        if policy.history_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "history_capacity must be at least 1".to_string(),
            ));
        }

        let tracer = &self.tracer;
        let bounds = &tracer.bounds;
        for (name, band) in [
            ("prior", bounds.prior),
            ("learn", bounds.learn),
            ("slip", bounds.slip),
            ("guess", bounds.guess),
        ] {
            if !(0.0 <= band.min && band.min <= band.max && band.max <= 1.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} band [{}, {}] is not inside [0, 1]",
                    band.min, band.max
                )));
            }
        }
        if tracer.max_observations == 0 {
            return Err(EngineError::InvalidConfig(
                "max_observations must be at least 1".to_string(),
            ));
        }
        if !(tracer.em_tolerance.is_finite() && tracer.em_tolerance > 0.0) {
            return Err(EngineError::InvalidConfig(
                "em_tolerance must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
