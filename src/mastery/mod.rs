//! Knowledge tracing layer
//!
//! - [`bkt`] - BKT parameters, the online update, forward filtering
//! - [`em`] - batch EM refit of per-user parameters
//! - [`training`] - offline per-user training over exported review logs
//!
//! [`KnowledgeTracer`] holds one [`MasteryState`] per skill for a single user.

pub mod bkt;
pub mod em;
pub mod training;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::config::TracerConfig;
use crate::error::ModelError;
use crate::numeric::sanitize_probability;

pub use bkt::{forward_mastery, quick_update, BktParams};
pub use em::{train_em, train_em_sequences, EmFit, EmOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryState {
    pub mastery_probability: f64,
    pub parameters: BktParams,
    #[serde(default)]
    pub observations: VecDeque<bool>,
    /// True once the parameters come from a per-user refit.
    #[serde(default)]
    pub fitted: bool,
}

impl MasteryState {
    pub fn new(defaults: BktParams) -> Self {
        Self {
            mastery_probability: defaults.prior,
            parameters: defaults,
            observations: VecDeque::new(),
            fitted: false,
        }
    }
}

/// Result of a full refit pass over every skill.
#[derive(Debug, Clone, Default)]
pub struct RefitReport {
    pub refitted: Vec<(String, EmFit)>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryExport {
    pub mastery: BTreeMap<String, f64>,
    pub params: BTreeMap<String, BktParams>,
}

#[derive(Debug, Clone)]
pub struct KnowledgeTracer {
    config: TracerConfig,
    skills: Vec<String>,
    states: HashMap<String, MasteryState>,
}

impl KnowledgeTracer {
    pub fn new(skills: Vec<String>, config: TracerConfig) -> Self {
        Self {
            config,
            skills,
            states: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn knows_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s == skill)
    }

    /// Record one answer and apply the online mastery step.
    pub fn quick_update(&mut self, skill: &str, correct: bool) -> Result<f64, ModelError> {
        if !self.knows_skill(skill) {
            tracing::warn!(skill = %skill, "mastery update for unknown skill ignored");
            return Err(ModelError::UnknownTopic(skill.to_string()));
        }

        let defaults = self.config.defaults;
        let cap = self.config.max_observations;
        let state = self
            .states
            .entry(skill.to_string())
            .or_insert_with(|| MasteryState::new(defaults));

        state.observations.push_back(correct);
        while state.observations.len() > cap {
            state.observations.pop_front();
        }
        state.mastery_probability = quick_update(state.mastery_probability, correct, &state.parameters);

        Ok(state.mastery_probability)
    }

    /// Mastery probability; the default prior for a known skill without data.
    pub fn mastery(&self, skill: &str) -> Option<f64> {
        if !self.knows_skill(skill) {
            return None;
        }
        Some(
            self.states
                .get(skill)
                .map(|s| s.mastery_probability)
                .unwrap_or(self.config.defaults.prior),
        )
    }

    pub fn state(&self, skill: &str) -> Option<&MasteryState> {
        self.states.get(skill)
    }

    pub fn params(&self, skill: &str) -> Option<BktParams> {
        if !self.knows_skill(skill) {
            return None;
        }
        Some(
            self.states
                .get(skill)
                .map(|s| s.parameters)
                .unwrap_or(self.config.defaults),
        )
    }

    pub fn total_observations(&self) -> usize {
        self.states.values().map(|s| s.observations.len()).sum()
    }

    /// Refit one skill with EM, subject to the minimum-data policy.
    pub fn refit_skill(&mut self, skill: &str) -> Result<EmFit, ModelError> {
        if !self.knows_skill(skill) {
            tracing::warn!(skill = %skill, "refit for unknown skill ignored");
            return Err(ModelError::UnknownTopic(skill.to_string()));
        }

        let total_observations = self.total_observations();
        let skill_observations = self.states.get(skill).map_or(0, |s| s.observations.len());
        if skill_observations < self.config.min_skill_observations
            || total_observations < self.config.min_total_observations
        {
            tracing::debug!(
                skill = %skill,
                skill_observations,
                total_observations,
                "not enough data to refit, keeping current parameters"
            );
            return Err(ModelError::InsufficientData {
                skill: skill.to_string(),
                skill_observations,
                total_observations,
            });
        }

        let options = EmOptions::from_config(&self.config);
        let Some(state) = self.states.get_mut(skill) else {
            return Err(ModelError::UnknownTopic(skill.to_string()));
        };
        let observations: Vec<bool> = state.observations.iter().copied().collect();
        let fit = train_em(&observations, &options);

        state.parameters = fit.params;
        state.fitted = true;
        state.mastery_probability = sanitize_probability(
            forward_mastery(&fit.params, &observations),
            fit.params.prior,
        );

        tracing::debug!(
            skill = %skill,
            iterations = fit.iterations,
            mastery = state.mastery_probability,
            "skill refitted"
        );
        Ok(fit)
    }

    pub fn refit_all(&mut self) -> RefitReport {
        let mut report = RefitReport::default();
        for skill in self.skills.clone() {
            match self.refit_skill(&skill) {
                Ok(fit) => report.refitted.push((skill, fit)),
                Err(_) => report.skipped.push(skill),
            }
        }
        report
    }

    pub fn reset_all(&mut self) {
        self.states.clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, MasteryState> {
        self.states
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn restore(&mut self, states: BTreeMap<String, MasteryState>) {
        self.states.clear();
        for (skill, mut state) in states {
            if !self.knows_skill(&skill) {
                tracing::warn!(skill = %skill, "dropping persisted mastery for unknown skill");
                continue;
            }
            state.parameters = state.parameters.clamped(&self.config.bounds);
            state.mastery_probability =
                sanitize_probability(state.mastery_probability, state.parameters.prior);
            while state.observations.len() > self.config.max_observations {
                state.observations.pop_front();
            }
            self.states.insert(skill, state);
        }
    }

    pub fn export(&self) -> MasteryExport {
        let mut export = MasteryExport {
            mastery: BTreeMap::new(),
            params: BTreeMap::new(),
        };
        for (skill, state) in &self.states {
            export.mastery.insert(skill.clone(), state.mastery_probability);
            export.params.insert(skill.clone(), state.parameters);
        }
        export
    }
}
