//! Topic and difficulty selection.
//!
//! Epsilon-greedy exploration wrapped around Thompson Sampling: with
//! probability `epsilon` a uniformly random topic is chosen, otherwise every
//! arm draws from its Beta posterior, a weakness bonus favouring low-ability
//! topics is added, and the highest score wins. Difficulty then follows the
//! learner's ability with a small zone-of-proximal-development offset.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::ability::AbilityEstimator;
use crate::config::PolicyConfig;
use crate::decision::history::{SelectionEvent, SelectionHistory};
use crate::decision::thompson::{BanditArm, BetaSampler};
use crate::error::{EngineError, ModelError};
use crate::numeric::{clamp_finite, safe_ratio};
use crate::types::{
    DifficultyLevel, ItemRecord, ProficiencyLevel, RecommendationBatch, ResponseEvent,
    SelectionRationale, WeaknessEntry,
};

/// Events considered by the recent-accuracy insight.
pub const RECENT_WINDOW: usize = 20;
/// Topics listed in a batch's weakness summary.
pub const WEAKNESS_SUMMARY_SIZE: usize = 3;

// ==================== Scoring ====================

/// Bonus for low-ability topics: `weight * (1 - (theta - min) / (max - min))`,
/// which is `weight * (1 - (theta + 3) / 6)` for the default range.
pub fn weakness_bonus(theta: f64, (theta_min, theta_max): (f64, f64), weight: f64) -> f64 {
    let normalized = clamp_finite(
        safe_ratio(theta - theta_min, theta_max - theta_min, 0.5),
        0.0,
        1.0,
        0.5,
    );
    weight * (1.0 - normalized)
}

/// Difficulty band for an ability estimate.
pub fn difficulty_for_theta(theta: f64, config: &PolicyConfig) -> DifficultyLevel {
    let target = theta + config.zpd_offset;
    if target < config.easy_below {
        DifficultyLevel::Easy
    } else if target < config.medium_below {
        DifficultyLevel::Medium
    } else {
        DifficultyLevel::Hard
    }
}

/// Reward in [0, 1]: zero when wrong, a speed-weighted bonus when right.
pub fn response_reward(correct: bool, response_time_seconds: f64, config: &PolicyConfig) -> f64 {
    if !correct {
        return 0.0;
    }
    // unusable timings earn no speed bonus
    if !(response_time_seconds.is_finite() && response_time_seconds >= 0.0) {
        return config.correct_base_reward;
    }
    let window = config.speed_window_seconds.max(f64::EPSILON);
    let speed_bonus = clamp_finite(1.0 - response_time_seconds / window, 0.0, 1.0, 0.0);
    config.correct_base_reward + config.speed_reward_weight * speed_bonus
}

// ==================== Types ====================

/// Outcome of one topic draw.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicChoice {
    pub topic: String,
    pub explored: bool,
    /// Posterior draw plus weakness bonus; `None` for exploration picks.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmStats {
    pub pulls: u32,
    pub cumulative_reward: f64,
    pub average_reward: f64,
    pub alpha: f64,
    pub beta: f64,
    pub expected_value: f64,
}

impl From<&BanditArm> for ArmStats {
    fn from(arm: &BanditArm) -> Self {
        Self {
            pulls: arm.pulls,
            cumulative_reward: arm.cumulative_reward,
            average_reward: arm.average_reward(),
            alpha: arm.alpha,
            beta: arm.beta,
            expected_value: arm.expected_value(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditInsights {
    pub most_practiced: Option<String>,
    pub best_performing: Option<String>,
    /// Lowest posterior mean among topics that have been practiced.
    pub needs_attention: Option<String>,
    pub recent_accuracy: Option<f64>,
    pub mean_response_time: Option<f64>,
    pub total_pulls: u64,
    pub exploration_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyExport {
    pub arm_stats: BTreeMap<String, ArmStats>,
    pub question_history: Vec<SelectionEvent>,
    pub epsilon: f64,
    pub insights: BanditInsights,
}

// ==================== Policy ====================

#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    config: PolicyConfig,
    topics: Vec<String>,
    arms: HashMap<String, BanditArm>,
    epsilon: f64,
    history: SelectionHistory,
    sampler: BetaSampler,
}

impl SelectionPolicy {
    pub fn new(topics: Vec<String>, config: PolicyConfig) -> Result<Self, EngineError> {
        if topics.is_empty() {
            return Err(EngineError::EmptyTopicUniverse);
        }
        let arms = topics
            .iter()
            .map(|t| (t.clone(), BanditArm::default()))
            .collect();
        Ok(Self {
            epsilon: config.initial_epsilon,
            history: SelectionHistory::new(config.history_capacity),
            sampler: BetaSampler::new(config.seed),
            arms,
            topics,
            config,
        })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn arm(&self, topic: &str) -> Option<&BanditArm> {
        self.arms.get(topic)
    }

    pub fn history(&self) -> &SelectionHistory {
        &self.history
    }

    /// Pick the next topic to practice.
    pub fn select_topic(&mut self, ability: &AbilityEstimator) -> TopicChoice {
        if self.sampler.uniform() < self.epsilon {
            let idx = self.sampler.index(self.topics.len());
            return TopicChoice {
                topic: self.topics[idx].clone(),
                explored: true,
                score: None,
            };
        }

        let range = ability.theta_range();
        let mut best: Option<(usize, f64)> = None;
        for (idx, topic) in self.topics.iter().enumerate() {
            let arm = self.arms.get(topic).cloned().unwrap_or_default();
            let sample = self.sampler.sample_beta(arm.alpha, arm.beta);
            let theta = ability.ability(topic).unwrap_or(0.0);
            let score = sample + weakness_bonus(theta, range, self.config.weakness_weight);
            // strict comparison keeps the first topic on ties
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        let (idx, score) = best.unwrap_or((0, 0.0));
        TopicChoice {
            topic: self.topics[idx].clone(),
            explored: false,
            score: Some(score),
        }
    }

    pub fn select_difficulty(&self, ability: &AbilityEstimator, topic: &str) -> DifficultyLevel {
        difficulty_for_theta(ability.ability(topic).unwrap_or(0.0), &self.config)
    }

    /// Draw up to `count` items from `pool`.
    ///
    /// Each slot draws a (topic, difficulty) pair and picks uniformly among
    /// unused pool items matching it exactly. A slot without candidates is
    /// skipped, so the batch can be shorter than `count`.
    pub fn recommend(
        &mut self,
        pool: &[ItemRecord],
        count: usize,
        ability: &AbilityEstimator,
    ) -> RecommendationBatch {
        let mut batch = RecommendationBatch {
            weakness_summary: self.weakness_summary(ability),
            ..Default::default()
        };
        let mut used: HashSet<&str> = HashSet::new();

        for _ in 0..count {
            let choice = self.select_topic(ability);
            let difficulty = self.select_difficulty(ability, &choice.topic);
            let theta = ability.ability(&choice.topic).unwrap_or(0.0);

            let candidates: Vec<&ItemRecord> = pool
                .iter()
                .filter(|item| {
                    item.topic == choice.topic
                        && item.difficulty == difficulty
                        && !used.contains(item.id.as_str())
                })
                .collect();

            if candidates.is_empty() {
                tracing::debug!(
                    topic = %choice.topic,
                    difficulty = %difficulty,
                    "no unused item for drawn pair, skipping slot"
                );
                continue;
            }

            let item = candidates[self.sampler.index(candidates.len())];
            used.insert(item.id.as_str());
            batch.items.push(item.clone());
            batch.rationale.push(SelectionRationale {
                reason: rationale_text(&choice, difficulty, theta),
                topic: choice.topic,
                difficulty,
                theta,
                explored: choice.explored,
            });
        }

        batch
    }

    /// Apply one answered item: ability step, reward accounting, history, decay.
    ///
    /// Returns the reward credited to the topic's arm.
    pub fn update_model(
        &mut self,
        ability: &mut AbilityEstimator,
        event: &ResponseEvent,
    ) -> Result<f64, ModelError> {
        if !self.arms.contains_key(&event.topic) {
            tracing::warn!(topic = %event.topic, "bandit update for unknown topic ignored");
            return Err(ModelError::UnknownTopic(event.topic.clone()));
        }

        ability.update_ability(
            &event.topic,
            event.correct,
            event.difficulty,
            event.discrimination,
        )?;

        let reward = response_reward(event.correct, event.response_time_seconds, &self.config);
        if let Some(arm) = self.arms.get_mut(&event.topic) {
            arm.record(event.correct, reward);
        }

        self.history.push(SelectionEvent::now(
            event.topic.clone(),
            event.correct,
            event.difficulty,
            event.response_time_seconds,
            reward,
        ));
        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.min_epsilon);

        Ok(reward)
    }

    pub fn insights(&self) -> BanditInsights {
        let pulled: Vec<(&String, &BanditArm)> = self
            .topics
            .iter()
            .filter_map(|t| self.arms.get(t).map(|a| (t, a)))
            .filter(|(_, a)| a.pulls > 0)
            .collect();

        // max_by/min_by keep the last/first extreme; reverse so ties go to topic order
        let most_practiced = pulled
            .iter()
            .rev()
            .max_by_key(|(_, a)| a.pulls)
            .map(|(t, _)| t.to_string());
        let best_performing = pulled
            .iter()
            .rev()
            .max_by(|(_, a), (_, b)| a.average_reward().total_cmp(&b.average_reward()))
            .map(|(t, _)| t.to_string());
        let needs_attention = pulled
            .iter()
            .min_by(|(_, a), (_, b)| a.expected_value().total_cmp(&b.expected_value()))
            .map(|(t, _)| t.to_string());

        BanditInsights {
            most_practiced,
            best_performing,
            needs_attention,
            recent_accuracy: self.history.recent_accuracy(RECENT_WINDOW),
            mean_response_time: self.history.mean_response_time(),
            total_pulls: self.arms.values().map(|a| u64::from(a.pulls)).sum(),
            exploration_rate: self.epsilon,
        }
    }

    pub fn export(&self) -> PolicyExport {
        PolicyExport {
            arm_stats: self
                .arms
                .iter()
                .map(|(t, a)| (t.clone(), ArmStats::from(a)))
                .collect(),
            question_history: self.history.to_vec(),
            epsilon: self.epsilon,
            insights: self.insights(),
        }
    }

    pub fn arms_snapshot(&self) -> BTreeMap<String, BanditArm> {
        self.arms
            .iter()
            .map(|(t, a)| (t.clone(), a.clone()))
            .collect()
    }

    /// Replace arm state; topics missing from `arms` start from the prior.
    pub fn restore_arms(&mut self, arms: BTreeMap<String, BanditArm>) {
        for arm in self.arms.values_mut() {
            *arm = BanditArm::default();
        }
        for (topic, arm) in arms {
            match self.arms.get_mut(&topic) {
                Some(slot) => *slot = arm.repaired(),
                None => {
                    tracing::warn!(topic = %topic, "dropping persisted arm for unknown topic");
                }
            }
        }
    }

    pub fn restore_epsilon(&mut self, epsilon: f64) {
        self.epsilon = clamp_finite(epsilon, 0.0, 1.0, self.config.initial_epsilon)
            .max(self.config.min_epsilon);
    }

    pub fn restore_history(&mut self, events: Vec<SelectionEvent>) {
        self.history.restore(events);
    }

    pub fn reset(&mut self) {
        for arm in self.arms.values_mut() {
            *arm = BanditArm::default();
        }
        self.epsilon = self.config.initial_epsilon;
        self.history.clear();
    }

    fn weakness_summary(&self, ability: &AbilityEstimator) -> Vec<WeaknessEntry> {
        ability
            .weakest(WEAKNESS_SUMMARY_SIZE)
            .into_iter()
            .map(|(topic, theta)| WeaknessEntry {
                topic,
                theta,
                level: ProficiencyLevel::from_theta(theta),
            })
            .collect()
    }
}

fn rationale_text(choice: &TopicChoice, difficulty: DifficultyLevel, theta: f64) -> String {
    match choice.score {
        Some(score) => format!(
            "{} selected by posterior sampling (score {:.2}); {} items target ability {:.2}",
            choice.topic, score, difficulty, theta
        ),
        None => format!(
            "{} selected for exploration; {} items target ability {:.2}",
            choice.topic, difficulty, theta
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AbilityConfig;

    fn topics() -> Vec<String> {
        vec!["algebra".into(), "geometry".into(), "reading".into()]
    }

    fn greedy_config(seed: u64) -> PolicyConfig {
        PolicyConfig {
            initial_epsilon: 0.0,
            seed: Some(seed),
            ..Default::default()
        }
    }

    fn setup(config: PolicyConfig) -> (SelectionPolicy, AbilityEstimator) {
        let policy = SelectionPolicy::new(topics(), config).unwrap();
        let ability = AbilityEstimator::new(topics(), AbilityConfig::default());
        (policy, ability)
    }

    fn item(id: &str, topic: &str, difficulty: DifficultyLevel) -> ItemRecord {
        ItemRecord {
            id: id.to_string(),
            topic: topic.to_string(),
            difficulty,
            discrimination: None,
        }
    }

    #[test]
    fn test_empty_universe_rejected() {
        let err = SelectionPolicy::new(vec![], PolicyConfig::default()).unwrap_err();
        assert_eq!(err, EngineError::EmptyTopicUniverse);
    }

    #[test]
    fn test_weakness_bonus_range() {
        let range = (-3.0, 3.0);
        assert!((weakness_bonus(-3.0, range, 0.3) - 0.3).abs() < 1e-12);
        assert!(weakness_bonus(3.0, range, 0.3).abs() < 1e-12);
        assert!((weakness_bonus(0.0, range, 0.3) - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_weakness_bonus_follows_configured_range() {
        assert!((weakness_bonus(0.0, (0.0, 6.0), 0.3) - 0.3).abs() < 1e-12);
        assert!((weakness_bonus(-1.0, (-1.0, 1.0), 0.3) - 0.3).abs() < 1e-12);
        assert!((weakness_bonus(0.5, (-1.0, 1.0), 0.3) - 0.075).abs() < 1e-12);
        assert_eq!(weakness_bonus(9.0, (-1.0, 1.0), 0.3), 0.0);
        assert!((weakness_bonus(f64::NAN, (-1.0, 1.0), 0.3) - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_select_topic_uses_estimator_range() {
        let config = PolicyConfig {
            weakness_weight: 10.0,
            ..greedy_config(5)
        };
        let mut policy = SelectionPolicy::new(topics(), config).unwrap();
        let ability_config = AbilityConfig {
            theta_min: 0.0,
            theta_max: 6.0,
            ..AbilityConfig::default()
        };
        let mut ability = AbilityEstimator::new(topics(), ability_config);
        let states = topics()
            .into_iter()
            .map(|t| {
                let theta = if t == "algebra" { 0.0 } else { 6.0 };
                (
                    t,
                    crate::ability::AbilityState {
                        theta,
                        attempts: 4,
                        correct: 2,
                    },
                )
            })
            .collect();
        ability.restore(states);

        let choice = policy.select_topic(&ability);
        assert_eq!(choice.topic, "algebra");
        assert!(choice.score.unwrap() >= 10.0);
    }

    #[test]
    fn test_difficulty_bands() {
        let config = PolicyConfig::default();
        assert_eq!(difficulty_for_theta(-1.5, &config), DifficultyLevel::Easy);
        assert_eq!(difficulty_for_theta(-1.0, &config), DifficultyLevel::Medium);
        assert_eq!(difficulty_for_theta(0.0, &config), DifficultyLevel::Medium);
        assert_eq!(difficulty_for_theta(0.25, &config), DifficultyLevel::Hard);
    }

    #[test]
    fn test_reward_speed_bonus() {
        let config = PolicyConfig::default();
        assert_eq!(response_reward(false, 1.0, &config), 0.0);
        assert!((response_reward(true, 0.0, &config) - 1.0).abs() < 1e-12);
        assert!((response_reward(true, 60.0, &config) - 0.85).abs() < 1e-12);
        assert!((response_reward(true, 500.0, &config) - 0.7).abs() < 1e-12);
        assert!((response_reward(true, f64::NAN, &config) - 0.7).abs() < 1e-12);
        assert!((response_reward(true, -3.0, &config) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_dominant_arm_preferred() {
        let (mut policy, ability) = setup(greedy_config(11));
        let mut arms = BTreeMap::new();
        arms.insert(
            "algebra".to_string(),
            BanditArm { pulls: 10, cumulative_reward: 8.0, alpha: 10.0, beta: 2.0 },
        );
        arms.insert(
            "geometry".to_string(),
            BanditArm { pulls: 2, cumulative_reward: 1.0, alpha: 2.0, beta: 2.0 },
        );
        policy.restore_arms(arms);
        policy.topics.retain(|t| t != "reading");

        let wins = (0..1000)
            .filter(|_| policy.select_topic(&ability).topic == "algebra")
            .count();
        assert!(wins >= 750, "dominant arm won {} of 1000", wins);
    }

    #[test]
    fn test_full_exploration_is_uniform() {
        let config = PolicyConfig {
            initial_epsilon: 1.0,
            seed: Some(3),
            ..Default::default()
        };
        let (mut policy, ability) = setup(config);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..900 {
            let choice = policy.select_topic(&ability);
            assert!(choice.explored);
            *counts.entry(choice.topic).or_default() += 1;
        }
        for topic in topics() {
            let n = counts.get(&topic).copied().unwrap_or(0);
            assert!(n > 200, "{} drawn {} times", topic, n);
        }
    }

    #[test]
    fn test_update_model_accounting() {
        let (mut policy, mut ability) = setup(greedy_config(1));
        let event = ResponseEvent::new("algebra", true, DifficultyLevel::Medium, 0.0);
        let reward = policy.update_model(&mut ability, &event).unwrap();
        assert!((reward - 1.0).abs() < 1e-12);

        let arm = policy.arm("algebra").unwrap();
        assert_eq!(arm.pulls, 1);
        assert_eq!(arm.alpha, 2.0);
        assert!(arm.is_consistent());
        assert!((ability.ability("algebra").unwrap() - 0.15).abs() < 1e-12);
        assert_eq!(policy.history().len(), 1);
    }

    #[test]
    fn test_epsilon_decays_per_response() {
        let (mut policy, mut ability) = setup(PolicyConfig {
            seed: Some(5),
            ..Default::default()
        });
        for _ in 0..10 {
            let event = ResponseEvent::new("reading", false, DifficultyLevel::Easy, 30.0);
            policy.update_model(&mut ability, &event).unwrap();
        }
        let expected = 0.15 * 0.995f64.powi(10);
        assert!((policy.epsilon() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_topic_is_noop() {
        let (mut policy, mut ability) = setup(greedy_config(1));
        let event = ResponseEvent::new("chemistry", true, DifficultyLevel::Hard, 5.0);
        assert!(policy.update_model(&mut ability, &event).is_err());
        assert!(policy.history().is_empty());
        assert_eq!(policy.epsilon(), 0.0);
        assert_eq!(policy.insights().total_pulls, 0);
    }

    #[test]
    fn test_recommend_limited_by_matching_pool() {
        let (mut policy, ability) = setup(greedy_config(9));
        let pool = vec![
            item("a1", "algebra", DifficultyLevel::Medium),
            item("a2", "algebra", DifficultyLevel::Medium),
            item("a3", "algebra", DifficultyLevel::Medium),
            item("a4", "algebra", DifficultyLevel::Hard),
        ];
        let batch = policy.recommend(&pool, 10, &ability);

        assert!(batch.len() <= 3);
        let mut ids: Vec<_> = batch.items.iter().map(|i| i.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), batch.len());
        assert!(batch.items.iter().all(|i| i.difficulty == DifficultyLevel::Medium));
        assert_eq!(batch.rationale.len(), batch.len());
    }

    #[test]
    fn test_recommend_empty_pool() {
        let (mut policy, ability) = setup(greedy_config(2));
        let batch = policy.recommend(&[], 5, &ability);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_insights() {
        let (mut policy, mut ability) = setup(greedy_config(1));
        let events = [
            ("algebra", true, 10.0),
            ("algebra", true, 20.0),
            ("algebra", false, 30.0),
            ("geometry", false, 40.0),
        ];
        for (topic, correct, rt) in events {
            let event = ResponseEvent::new(topic, correct, DifficultyLevel::Medium, rt);
            policy.update_model(&mut ability, &event).unwrap();
        }
        let insights = policy.insights();
        assert_eq!(insights.most_practiced.as_deref(), Some("algebra"));
        assert_eq!(insights.best_performing.as_deref(), Some("algebra"));
        assert_eq!(insights.needs_attention.as_deref(), Some("geometry"));
        assert_eq!(insights.recent_accuracy, Some(0.5));
        assert_eq!(insights.mean_response_time, Some(25.0));
        assert_eq!(insights.total_pulls, 4);
    }

    #[test]
    fn test_restore_repairs_arms() {
        let (mut policy, _) = setup(greedy_config(1));
        let mut arms = BTreeMap::new();
        arms.insert(
            "algebra".to_string(),
            BanditArm { pulls: 99, cumulative_reward: 1.0, alpha: 3.0, beta: 2.0 },
        );
        arms.insert("unknown".to_string(), BanditArm::default());
        policy.restore_arms(arms);
        assert!(policy.arm("algebra").unwrap().is_consistent());
        assert!(policy.arm("unknown").is_none());

        policy.restore_epsilon(f64::NAN);
        assert_eq!(policy.epsilon(), 0.0);
    }
}
