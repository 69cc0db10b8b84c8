//! Offline per-user BKT training over an exported review log.
//!
//! Pipeline: load reviews → data-quality check → per-user EM fit of every
//! skill with enough data → export `{user: {skill: params}}` and
//! `{user: {skill: mastery}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::TracerConfig;
use crate::error::TrainingError;
use crate::mastery::bkt::{forward_mastery, BktParams};
use crate::mastery::em::{train_em, EmOptions};

/// Reviews needed overall before training is considered reliable.
pub const MIN_TOTAL_REVIEWS: usize = 100;
/// Skills below this count trigger a grouping warning.
pub const MIN_REVIEWS_PER_SKILL: usize = 10;
/// Mastery reported for users without a trained model.
pub const UNTRAINED_MASTERY: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub user_id: String,
    pub skill: String,
    #[serde(deserialize_with = "deserialize_correct")]
    pub correct: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CorrectFlag {
    Bool(bool),
    Int(i64),
}

/// Review exports encode correctness as either a boolean or 0/1.
fn deserialize_correct<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match CorrectFlag::deserialize(deserializer)? {
        CorrectFlag::Bool(b) => b,
        CorrectFlag::Int(i) => i != 0,
    })
}

pub fn load_reviews(path: impl AsRef<Path>) -> Result<Vec<ReviewRecord>, TrainingError> {
    let raw = std::fs::read_to_string(path)?;
    let mut reviews: Vec<ReviewRecord> = serde_json::from_str(&raw)?;
    sort_reviews(&mut reviews);
    Ok(reviews)
}

/// Order by user, then time.
pub fn sort_reviews(reviews: &mut [ReviewRecord]) {
    reviews.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });
}

#[derive(Debug, Clone, Serialize)]
pub struct DataQualityReport {
    pub total_reviews: usize,
    pub unique_users: usize,
    pub unique_skills: usize,
    pub reviews_per_skill: BTreeMap<String, usize>,
    pub min_per_skill: usize,
    pub max_per_skill: usize,
    pub mean_per_skill: f64,
    pub accuracy: f64,
    pub warnings: Vec<String>,
    pub trainable: bool,
}

impl DataQualityReport {
    /// Refuse to train on a log below [`MIN_TOTAL_REVIEWS`].
    pub fn require_trainable(&self) -> Result<(), TrainingError> {
        if self.trainable {
            Ok(())
        } else {
            Err(TrainingError::NotEnoughData {
                total: self.total_reviews,
                required: MIN_TOTAL_REVIEWS,
            })
        }
    }
}

pub fn check_data_quality(reviews: &[ReviewRecord]) -> DataQualityReport {
    let mut reviews_per_skill: BTreeMap<String, usize> = BTreeMap::new();
    let mut users = BTreeSet::new();
    let mut correct = 0usize;
    for r in reviews {
        *reviews_per_skill.entry(r.skill.clone()).or_default() += 1;
        users.insert(r.user_id.as_str());
        if r.correct {
            correct += 1;
        }
    }

    let min_per_skill = reviews_per_skill.values().copied().min().unwrap_or(0);
    let max_per_skill = reviews_per_skill.values().copied().max().unwrap_or(0);
    let mean_per_skill = if reviews_per_skill.is_empty() {
        0.0
    } else {
        reviews.len() as f64 / reviews_per_skill.len() as f64
    };

    let mut warnings = Vec::new();
    let trainable = reviews.len() >= MIN_TOTAL_REVIEWS;
    if !trainable {
        warnings.push(format!(
            "only {} reviews; need at least {} for a reliable model",
            reviews.len(),
            MIN_TOTAL_REVIEWS
        ));
    }
    if !reviews_per_skill.is_empty() && min_per_skill < MIN_REVIEWS_PER_SKILL {
        warnings.push(format!(
            "some skills have fewer than {} reviews; consider grouping skills",
            MIN_REVIEWS_PER_SKILL
        ));
    }

    DataQualityReport {
        total_reviews: reviews.len(),
        unique_users: users.len(),
        unique_skills: reviews_per_skill.len(),
        reviews_per_skill,
        min_per_skill,
        max_per_skill,
        mean_per_skill,
        accuracy: if reviews.is_empty() {
            0.0
        } else {
            correct as f64 / reviews.len() as f64
        },
        warnings,
        trainable,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingOutput {
    /// `{user: {skill: params}}` for every skill that was refitted.
    pub params: BTreeMap<String, BTreeMap<String, BktParams>>,
    /// `{user: {skill: mastery}}` for every skill seen.
    pub mastery: BTreeMap<String, BTreeMap<String, f64>>,
    pub skipped_users: Vec<String>,
}

/// Train one parameter set per (user, skill).
///
/// Users below the total-observation threshold get no model and a flat
/// mastery estimate; skills below the per-skill threshold keep the shared
/// defaults, with mastery filtered under those defaults.
pub fn train_per_user(reviews: &[ReviewRecord], config: &TracerConfig) -> TrainingOutput {
    let mut by_user: BTreeMap<&str, Vec<&ReviewRecord>> = BTreeMap::new();
    for r in reviews {
        by_user.entry(r.user_id.as_str()).or_default().push(r);
    }

    let options = EmOptions::from_config(config);
    let mut output = TrainingOutput::default();

    for (user, mut records) in by_user {
        records.sort_by_key(|r| r.timestamp);

        let mut by_skill: BTreeMap<&str, Vec<bool>> = BTreeMap::new();
        for r in &records {
            by_skill.entry(r.skill.as_str()).or_default().push(r.correct);
        }

        if records.len() < config.min_total_observations {
            tracing::info!(
                user = %user,
                reviews = records.len(),
                "skipping user, not enough reviews"
            );
            output.skipped_users.push(user.to_string());
            output.mastery.insert(
                user.to_string(),
                by_skill
                    .keys()
                    .map(|s| (s.to_string(), UNTRAINED_MASTERY))
                    .collect(),
            );
            continue;
        }

        let mut user_params = BTreeMap::new();
        let mut user_mastery = BTreeMap::new();
        for (skill, observations) in by_skill {
            let params = if observations.len() >= config.min_skill_observations {
                let fit = train_em(&observations, &options);
                user_params.insert(skill.to_string(), fit.params);
                fit.params
            } else {
                config.defaults
            };
            user_mastery.insert(skill.to_string(), forward_mastery(&params, &observations));
        }

        tracing::info!(
            user = %user,
            reviews = records.len(),
            skills = user_params.len(),
            "trained user model"
        );
        output.params.insert(user.to_string(), user_params);
        output.mastery.insert(user.to_string(), user_mastery);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn review(user: &str, skill: &str, correct: bool, secs: i64) -> ReviewRecord {
        ReviewRecord {
            user_id: user.to_string(),
            skill: skill.to_string(),
            correct,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            response_time: None,
            card_id: None,
        }
    }

    #[test]
    fn test_parse_integer_and_bool_correctness() {
        let json = r#"[
            {"user_id":"u1","skill":"algebra","correct":1,"timestamp":"2024-03-01T10:00:00Z"},
            {"user_id":"u1","skill":"algebra","correct":false,"timestamp":"2024-03-01T09:00:00+00:00","response_time":12.5}
        ]"#;
        let mut reviews: Vec<ReviewRecord> = serde_json::from_str(json).unwrap();
        sort_reviews(&mut reviews);
        assert!(!reviews[0].correct);
        assert!(reviews[1].correct);
        assert_eq!(reviews[0].response_time, Some(12.5));
    }

    #[test]
    fn test_data_quality_warnings() {
        let reviews: Vec<_> = (0..12).map(|i| review("u1", "algebra", i % 2 == 0, i)).collect();
        let report = check_data_quality(&reviews);
        assert_eq!(report.total_reviews, 12);
        assert_eq!(report.unique_users, 1);
        assert_eq!(report.unique_skills, 1);
        assert!(!report.trainable);
        assert_eq!(report.warnings.len(), 1);
        assert!((report.accuracy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_small_log_is_rejected() {
        let reviews: Vec<_> = (0..99).map(|i| review("u1", "algebra", i % 3 != 0, i)).collect();
        let err = check_data_quality(&reviews).require_trainable().unwrap_err();
        assert!(matches!(
            err,
            TrainingError::NotEnoughData {
                total: 99,
                required: MIN_TOTAL_REVIEWS
            }
        ));
        assert!(check_data_quality(&[]).require_trainable().is_err());

        let reviews: Vec<_> = (0..100).map(|i| review("u1", "algebra", i % 3 != 0, i)).collect();
        assert!(check_data_quality(&reviews).require_trainable().is_ok());
    }

    #[test]
    fn test_train_per_user_thresholds() {
        let mut reviews = Vec::new();
        // u1: 24 reviews, 20 on algebra, 4 on geometry
        for i in 0..20 {
            reviews.push(review("u1", "algebra", i > 4, i));
        }
        for i in 0..4 {
            reviews.push(review("u1", "geometry", true, 100 + i));
        }
        // u2: too few reviews
        for i in 0..5 {
            reviews.push(review("u2", "algebra", true, i));
        }

        let output = train_per_user(&reviews, &TracerConfig::default());

        let u1_params = &output.params["u1"];
        assert!(u1_params.contains_key("algebra"));
        assert!(!u1_params.contains_key("geometry"));
        assert_eq!(output.mastery["u1"].len(), 2);

        assert_eq!(output.skipped_users, vec!["u2".to_string()]);
        assert_eq!(output.mastery["u2"]["algebra"], UNTRAINED_MASTERY);
        assert!(!output.params.contains_key("u2"));
    }
}
