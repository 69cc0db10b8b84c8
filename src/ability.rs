//! Per-topic ability estimation under a 2-parameter logistic (2PL) model.
//!
//! Each topic carries one latent ability `theta`, nudged after every answer by
//! a single gradient step on the Bernoulli log-likelihood:
//!
//! ```text
//! p     = 1 / (1 + exp(-a (theta - b)))
//! theta = clamp(theta + lr * a * (y - p), theta_min, theta_max)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::AbilityConfig;
use crate::error::ModelError;
use crate::numeric::{clamp_finite, safe_ratio, sigmoid, standard_normal_cdf};
use crate::types::{DifficultyLevel, DomainStats, ProficiencyLevel};

/// 2PL probability of a correct answer.
pub fn probability_correct(theta: f64, a: f64, b: f64) -> f64 {
    sigmoid(a * (theta - b))
}

/// Linear map from mean ability to the 200–800 reporting scale.
pub fn scaled_score(avg_theta: f64) -> f64 {
    clamp_finite(500.0 + 100.0 * avg_theta, 200.0, 800.0, 500.0)
}

/// Largest per-topic counter accepted from a persisted snapshot.
pub const MAX_RESTORED_COUNT: u32 = 1_000_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AbilityState {
    pub theta: f64,
    pub attempts: u32,
    pub correct: u32,
}

impl AbilityState {
    pub fn accuracy(&self) -> f64 {
        safe_ratio(self.correct as f64, self.attempts as f64, 0.0)
    }
}

/// Result of one ability update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbilityUpdate {
    pub previous_theta: f64,
    pub theta: f64,
    pub probability: f64,
    pub gradient: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicExport {
    pub theta: f64,
    pub attempts: u32,
    pub correct: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilitySummary {
    pub total_attempts: u64,
    pub total_correct: u64,
    pub avg_theta: f64,
}

/// Offline-analysis export of all topic abilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityExport {
    pub topics: BTreeMap<String, TopicExport>,
    pub summary: AbilitySummary,
}

#[derive(Debug, Clone)]
pub struct AbilityEstimator {
    config: AbilityConfig,
    topics: Vec<String>,
    states: HashMap<String, AbilityState>,
}

impl AbilityEstimator {
    /// `topics` is assumed validated (non-empty, unique) by the engine.
    pub fn new(topics: Vec<String>, config: AbilityConfig) -> Self {
        Self {
            config,
            topics,
            states: HashMap::new(),
        }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Configured `(theta_min, theta_max)`.
    pub fn theta_range(&self) -> (f64, f64) {
        (self.config.theta_min, self.config.theta_max)
    }

    pub fn knows_topic(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    pub fn update_ability(
        &mut self,
        topic: &str,
        correct: bool,
        difficulty: DifficultyLevel,
        discrimination: Option<f64>,
    ) -> Result<AbilityUpdate, ModelError> {
        if !self.knows_topic(topic) {
            tracing::warn!(topic = %topic, "ability update for unknown topic ignored");
            return Err(ModelError::UnknownTopic(topic.to_string()));
        }

        let a = self.effective_discrimination(discrimination);
        let b = difficulty.irt_b();
        let (theta_min, theta_max) = (self.config.theta_min, self.config.theta_max);
        let learning_rate = self.config.learning_rate;

        let state = self.states.entry(topic.to_string()).or_default();
        let previous_theta = state.theta;
        let probability = probability_correct(previous_theta, a, b);
        let y = if correct { 1.0 } else { 0.0 };
        let gradient = a * (y - probability);

        state.theta = clamp_finite(
            previous_theta + learning_rate * gradient,
            theta_min,
            theta_max,
            previous_theta,
        );
        state.attempts = state.attempts.saturating_add(1);
        if correct {
            state.correct = state.correct.saturating_add(1);
        }

        Ok(AbilityUpdate {
            previous_theta,
            theta: state.theta,
            probability,
            gradient,
        })
    }

    /// Current theta; 0 for a known topic without data, `None` if unknown.
    pub fn ability(&self, topic: &str) -> Option<f64> {
        if !self.knows_topic(topic) {
            return None;
        }
        Some(self.states.get(topic).map(|s| s.theta).unwrap_or(0.0))
    }

    pub fn state(&self, topic: &str) -> Option<&AbilityState> {
        self.states.get(topic)
    }

    pub fn domain_stats(&self, topic: &str) -> Option<DomainStats> {
        if !self.knows_topic(topic) {
            return None;
        }
        let state = self.states.get(topic).copied().unwrap_or_default();
        Some(DomainStats {
            topic: topic.to_string(),
            theta: state.theta,
            attempts: state.attempts,
            correct: state.correct,
            accuracy: state.accuracy(),
            percentile: standard_normal_cdf(state.theta) * 100.0,
            proficiency_level: ProficiencyLevel::from_theta(state.theta),
        })
    }

    /// Up to `k` practiced topics, lowest theta first.
    pub fn weakest(&self, k: usize) -> Vec<(String, f64)> {
        let mut ranked = self.practiced();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.truncate(k);
        ranked
    }

    /// Up to `k` practiced topics, highest theta first.
    pub fn strongest(&self, k: usize) -> Vec<(String, f64)> {
        let mut ranked = self.practiced();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);
        ranked
    }

    /// Scaled score over the topics in `group` that have data, or `None`.
    pub fn estimated_scaled_score<S: AsRef<str>>(&self, group: &[S]) -> Option<f64> {
        let thetas: Vec<f64> = group
            .iter()
            .filter_map(|t| self.states.get(t.as_ref()))
            .filter(|s| s.attempts > 0)
            .map(|s| s.theta)
            .collect();
        if thetas.is_empty() {
            return None;
        }
        let avg = thetas.iter().sum::<f64>() / thetas.len() as f64;
        Some(scaled_score(avg))
    }

    pub fn reset_topic(&mut self, topic: &str) -> Result<(), ModelError> {
        if !self.knows_topic(topic) {
            tracing::warn!(topic = %topic, "reset for unknown topic ignored");
            return Err(ModelError::UnknownTopic(topic.to_string()));
        }
        if let Some(state) = self.states.get_mut(topic) {
            *state = AbilityState::default();
        }
        Ok(())
    }

    pub fn reset_all(&mut self) {
        for state in self.states.values_mut() {
            *state = AbilityState::default();
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, AbilityState> {
        self.states
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Replace state from a persisted map. Unknown topics are dropped and
    /// out-of-range values repaired.
    pub fn restore(&mut self, states: BTreeMap<String, AbilityState>) {
        self.states.clear();
        for (topic, mut state) in states {
            if !self.knows_topic(&topic) {
                tracing::warn!(topic = %topic, "dropping persisted ability for unknown topic");
                continue;
            }
            state.theta =
                clamp_finite(state.theta, self.config.theta_min, self.config.theta_max, 0.0);
            state.attempts = state.attempts.min(MAX_RESTORED_COUNT);
            state.correct = state.correct.min(state.attempts);
            self.states.insert(topic, state);
        }
    }

    pub fn export(&self) -> AbilityExport {
        let topics: BTreeMap<String, TopicExport> = self
            .states
            .iter()
            .map(|(topic, s)| {
                (
                    topic.clone(),
                    TopicExport {
                        theta: s.theta,
                        attempts: s.attempts,
                        correct: s.correct,
                    },
                )
            })
            .collect();

        let practiced = self.practiced();
        let avg_theta = if practiced.is_empty() {
            0.0
        } else {
            practiced.iter().map(|(_, t)| t).sum::<f64>() / practiced.len() as f64
        };

        AbilityExport {
            summary: AbilitySummary {
                total_attempts: self.states.values().map(|s| u64::from(s.attempts)).sum(),
                total_correct: self.states.values().map(|s| u64::from(s.correct)).sum(),
                avg_theta,
            },
            topics,
        }
    }

    /// Practiced topics in universe order.
    fn practiced(&self) -> Vec<(String, f64)> {
        self.topics
            .iter()
            .filter_map(|t| {
                self.states
                    .get(t)
                    .filter(|s| s.attempts > 0)
                    .map(|s| (t.clone(), s.theta))
            })
            .collect()
    }

    fn effective_discrimination(&self, discrimination: Option<f64>) -> f64 {
        match discrimination {
            Some(a) if a.is_finite() && a > 0.0 => a,
            Some(a) => {
                tracing::debug!(discrimination = a, "invalid discrimination, using default");
                self.config.default_discrimination
            }
            None => self.config.default_discrimination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> AbilityEstimator {
        AbilityEstimator::new(
            vec!["algebra".into(), "geometry".into(), "reading".into()],
            AbilityConfig::default(),
        )
    }

    #[test]
    fn test_correct_medium_from_zero() {
        let mut est = estimator();
        let update = est
            .update_ability("algebra", true, DifficultyLevel::Medium, Some(1.0))
            .unwrap();
        assert!((update.probability - 0.5).abs() < 1e-12);
        assert!((update.gradient - 0.5).abs() < 1e-12);
        assert!((update.theta - 0.15).abs() < 1e-12);
        assert_eq!(est.state("algebra").unwrap().correct, 1);
    }

    #[test]
    fn test_incorrect_medium_from_zero() {
        let mut est = estimator();
        let update = est
            .update_ability("algebra", false, DifficultyLevel::Medium, None)
            .unwrap();
        assert!((update.theta + 0.15).abs() < 1e-12);
        let state = est.state("algebra").unwrap();
        assert_eq!(state.attempts, 1);
        assert_eq!(state.correct, 0);
    }

    #[test]
    fn test_unknown_topic_is_noop() {
        let mut est = estimator();
        let err = est
            .update_ability("chemistry", true, DifficultyLevel::Easy, None)
            .unwrap_err();
        assert_eq!(err, ModelError::UnknownTopic("chemistry".into()));
        assert!(est.state("chemistry").is_none());
        assert!(est.ability("chemistry").is_none());
        assert!(est.snapshot().is_empty());
    }

    #[test]
    fn test_theta_stays_bounded() {
        let mut est = estimator();
        for _ in 0..500 {
            est.update_ability("geometry", true, DifficultyLevel::Hard, Some(3.0))
                .unwrap();
        }
        assert!(est.ability("geometry").unwrap() <= 3.0);
        for _ in 0..1000 {
            est.update_ability("geometry", false, DifficultyLevel::Easy, Some(3.0))
                .unwrap();
        }
        assert!(est.ability("geometry").unwrap() >= -3.0);
    }

    #[test]
    fn test_probability_strictly_increasing() {
        let mut prev = probability_correct(-3.0, 1.2, 0.0);
        let mut theta = -3.0;
        while theta < 3.0 {
            theta += 0.25;
            let p = probability_correct(theta, 1.2, 0.0);
            assert!(p > prev);
            prev = p;
        }
    }

    #[test]
    fn test_invalid_discrimination_uses_default() {
        let mut a = estimator();
        let mut b = estimator();
        let ua = a
            .update_ability("reading", true, DifficultyLevel::Medium, Some(-2.0))
            .unwrap();
        let ub = b
            .update_ability("reading", true, DifficultyLevel::Medium, None)
            .unwrap();
        assert_eq!(ua.theta, ub.theta);
    }

    #[test]
    fn test_weakest_and_strongest_ignore_unpracticed() {
        let mut est = estimator();
        est.update_ability("algebra", true, DifficultyLevel::Medium, None)
            .unwrap();
        est.update_ability("reading", false, DifficultyLevel::Medium, None)
            .unwrap();

        let weakest = est.weakest(5);
        assert_eq!(weakest.len(), 2);
        assert_eq!(weakest[0].0, "reading");
        assert_eq!(est.strongest(1)[0].0, "algebra");
    }

    #[test]
    fn test_domain_stats() {
        let mut est = estimator();
        est.update_ability("algebra", true, DifficultyLevel::Medium, None)
            .unwrap();
        est.update_ability("algebra", false, DifficultyLevel::Medium, None)
            .unwrap();
        let stats = est.domain_stats("algebra").unwrap();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.accuracy, 0.5);
        assert!(stats.percentile > 0.0 && stats.percentile < 100.0);

        let fresh = est.domain_stats("geometry").unwrap();
        assert_eq!(fresh.accuracy, 0.0);
        assert_eq!(fresh.proficiency_level, ProficiencyLevel::Developing);
        assert!((fresh.percentile - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_scaled_score() {
        let mut est = estimator();
        assert_eq!(est.estimated_scaled_score(&["algebra", "geometry"]), None);
        est.update_ability("algebra", true, DifficultyLevel::Medium, None)
            .unwrap();
        let score = est
            .estimated_scaled_score(&["algebra", "geometry"])
            .unwrap();
        assert!((score - 515.0).abs() < 1e-9);
        assert_eq!(scaled_score(10.0), 800.0);
        assert_eq!(scaled_score(-10.0), 200.0);
    }

    #[test]
    fn test_restore_repairs_state() {
        let mut est = estimator();
        let mut persisted = BTreeMap::new();
        persisted.insert(
            "algebra".to_string(),
            AbilityState {
                theta: 9.0,
                attempts: 2,
                correct: 5,
            },
        );
        persisted.insert("unknown".to_string(), AbilityState::default());
        est.restore(persisted);

        let state = est.state("algebra").unwrap();
        assert_eq!(state.theta, 3.0);
        assert_eq!(state.correct, 2);
        assert!(est.state("unknown").is_none());
    }

    #[test]
    fn test_restore_caps_counters_and_export_sums_wide() {
        let mut est = estimator();
        let huge = AbilityState {
            theta: 0.0,
            attempts: u32::MAX,
            correct: u32::MAX,
        };
        let persisted: BTreeMap<String, AbilityState> = [
            ("algebra".to_string(), huge),
            ("geometry".to_string(), huge),
        ]
        .into_iter()
        .collect();
        est.restore(persisted);

        assert_eq!(est.state("algebra").unwrap().attempts, MAX_RESTORED_COUNT);
        let export = est.export();
        assert_eq!(export.summary.total_attempts, 2 * u64::from(MAX_RESTORED_COUNT));
        assert_eq!(export.summary.total_correct, 2 * u64::from(MAX_RESTORED_COUNT));
    }

    #[test]
    fn test_export_summary() {
        let mut est = estimator();
        est.update_ability("algebra", true, DifficultyLevel::Medium, None)
            .unwrap();
        est.update_ability("geometry", false, DifficultyLevel::Medium, None)
            .unwrap();
        let export = est.export();
        assert_eq!(export.summary.total_attempts, 2);
        assert_eq!(export.summary.total_correct, 1);
        assert!(export.summary.avg_theta.abs() < 1e-12);
        assert_eq!(export.topics.len(), 2);
    }

    #[test]
    fn test_reset_topic() {
        let mut est = estimator();
        est.update_ability("algebra", true, DifficultyLevel::Medium, None)
            .unwrap();
        est.reset_topic("algebra").unwrap();
        assert_eq!(est.state("algebra").unwrap().attempts, 0);
        assert_eq!(est.ability("algebra"), Some(0.0));
    }
}
