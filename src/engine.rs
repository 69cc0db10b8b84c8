//! Per-user adaptive practice engine.
//!
//! One [`Engine`] owns the ability estimator, knowledge tracer and selection
//! policy of a single learner. Updates run synchronously; persistence is
//! fire-and-forget through a background writer fed by a `watch` channel, so
//! only the newest pending snapshot is ever written.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::ability::{AbilityEstimator, AbilityExport};
use crate::config::EngineConfig;
use crate::decision::{PolicyExport, SelectionPolicy, TopicChoice};
use crate::error::{EngineError, ModelError, PersistenceError};
use crate::mastery::{KnowledgeTracer, MasteryExport, RefitReport};
use crate::persistence::SnapshotStore;
use crate::snapshot::{DecodedSnapshot, UserSnapshot};
use crate::types::{DifficultyLevel, DomainStats, ItemRecord, RecommendationBatch, ResponseEvent};

/// What one recorded response changed.
#[derive(Debug, Clone)]
pub struct ResponseOutcome {
    pub theta: f64,
    pub mastery: f64,
    pub reward: f64,
    pub epsilon: f64,
    /// Set when this response triggered a periodic refit.
    pub refit: Option<RefitReport>,
}

// ==================== Persistence plumbing ====================

type PendingSnapshot = Option<(u64, Value)>;

/// Serializes saves so an older revision never overwrites a newer one.
struct Persister {
    user_id: String,
    store: Arc<dyn SnapshotStore>,
    last_saved: Mutex<u64>,
}

impl Persister {
    async fn save(&self, revision: u64, snapshot: &Value) -> Result<(), PersistenceError> {
        let mut last_saved = self.last_saved.lock().await;
        if revision < *last_saved {
            return Ok(());
        }
        self.store.save(&self.user_id, snapshot).await?;
        *last_saved = revision;
        Ok(())
    }
}

struct SnapshotWriter {
    persister: Arc<Persister>,
    tx: watch::Sender<PendingSnapshot>,
    handle: JoinHandle<()>,
}

impl SnapshotWriter {
    fn spawn(user_id: String, store: Arc<dyn SnapshotStore>) -> Self {
        let persister = Arc::new(Persister {
            user_id,
            store,
            last_saved: Mutex::new(0),
        });
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(run_writer(persister.clone(), rx));
        Self {
            persister,
            tx,
            handle,
        }
    }
}

async fn run_writer(persister: Arc<Persister>, mut rx: watch::Receiver<PendingSnapshot>) {
    // changed() still yields an unseen value after the sender is dropped
    while rx.changed().await.is_ok() {
        let pending = rx.borrow_and_update().clone();
        let Some((revision, snapshot)) = pending else {
            continue;
        };
        if let Err(e) = persister.save(revision, &snapshot).await {
            tracing::warn!(
                error = %e,
                user_id = %persister.user_id,
                revision,
                "failed to save snapshot"
            );
        }
    }
}

// ==================== Engine ====================

pub struct Engine {
    user_id: String,
    config: EngineConfig,
    ability: AbilityEstimator,
    tracer: KnowledgeTracer,
    policy: SelectionPolicy,
    responses_since_refit: u32,
    revision: u64,
    writer: Option<SnapshotWriter>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("user_id", &self.user_id)
            .field("topics", &self.policy.topics())
            .field("responses_since_refit", &self.responses_since_refit)
            .field("revision", &self.revision)
            .field("persistent", &self.writer.is_some())
            .finish()
    }
}

impl Engine {
    /// In-memory engine with default state. Fails only on misconfiguration.
    pub fn new(
        user_id: impl Into<String>,
        topics: Vec<String>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        validate_topics(&topics)?;
        config.validate()?;
        for (group, members) in &config.topic_groups {
            if let Some(unknown) = members.iter().find(|m| !topics.contains(m)) {
                return Err(EngineError::InvalidConfig(format!(
                    "topic group {group} references unknown topic {unknown}"
                )));
            }
        }

        Ok(Self {
            user_id: user_id.into(),
            ability: AbilityEstimator::new(topics.clone(), config.ability.clone()),
            tracer: KnowledgeTracer::new(topics.clone(), config.tracer.clone()),
            policy: SelectionPolicy::new(topics, config.policy.clone())?,
            config,
            responses_since_refit: 0,
            revision: 0,
            writer: None,
        })
    }

    /// Build an engine from the user's stored snapshot and start the
    /// background writer. Load failures fall back to defaults.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn load(
        user_id: impl Into<String>,
        topics: Vec<String>,
        config: EngineConfig,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, EngineError> {
        let mut engine = Self::new(user_id, topics, config)?;

        match store.load(&engine.user_id).await {
            Ok(Some(value)) => {
                let corrupt = engine.restore_snapshot(&value);
                tracing::info!(
                    user_id = %engine.user_id,
                    corrupt_sections = ?corrupt,
                    "snapshot loaded"
                );
            }
            Ok(None) => {
                tracing::debug!(user_id = %engine.user_id, "no snapshot, starting fresh");
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    user_id = %engine.user_id,
                    "failed to load snapshot, using defaults"
                );
            }
        }

        engine.writer = Some(SnapshotWriter::spawn(engine.user_id.clone(), store));
        Ok(engine)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn topics(&self) -> &[String] {
        self.policy.topics()
    }

    pub fn ability_estimator(&self) -> &AbilityEstimator {
        &self.ability
    }

    pub fn knowledge_tracer(&self) -> &KnowledgeTracer {
        &self.tracer
    }

    pub fn selection_policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    // ==================== Updates ====================

    /// Apply one answered item to every subsystem.
    ///
    /// An unknown topic is logged and leaves all state untouched.
    pub fn record_response(&mut self, event: &ResponseEvent) -> Result<ResponseOutcome, ModelError> {
        if !self.ability.knows_topic(&event.topic) {
            tracing::warn!(
                user_id = %self.user_id,
                topic = %event.topic,
                "response for unknown topic ignored"
            );
            return Err(ModelError::UnknownTopic(event.topic.clone()));
        }

        let reward = self.policy.update_model(&mut self.ability, event)?;
        let mut mastery = self.tracer.quick_update(&event.topic, event.correct)?;

        self.responses_since_refit = self.responses_since_refit.saturating_add(1);
        let interval = self.config.tracer.refit_interval;
        let refit = if interval > 0 && self.responses_since_refit >= interval {
            self.responses_since_refit = 0;
            let report = self.tracer.refit_all();
            tracing::debug!(
                user_id = %self.user_id,
                refitted = report.refitted.len(),
                skipped = report.skipped.len(),
                "periodic mastery refit"
            );
            mastery = self.tracer.mastery(&event.topic).unwrap_or(mastery);
            Some(report)
        } else {
            None
        };

        self.schedule_save();

        Ok(ResponseOutcome {
            theta: self.ability.ability(&event.topic).unwrap_or(0.0),
            mastery,
            reward,
            epsilon: self.policy.epsilon(),
            refit,
        })
    }

    /// Refit every skill that meets the minimum-data policy.
    pub fn refit_mastery(&mut self) -> RefitReport {
        let report = self.tracer.refit_all();
        self.responses_since_refit = 0;
        self.schedule_save();
        report
    }

    pub fn reset_topic(&mut self, topic: &str) -> Result<(), ModelError> {
        self.ability.reset_topic(topic)?;
        self.schedule_save();
        Ok(())
    }

    /// Forget everything learned about this user.
    pub fn reset(&mut self) {
        self.ability.reset_all();
        self.tracer.reset_all();
        self.policy.reset();
        self.responses_since_refit = 0;
        self.schedule_save();
    }

    // ==================== Selection ====================

    pub fn select_topic(&mut self) -> TopicChoice {
        self.policy.select_topic(&self.ability)
    }

    pub fn select_difficulty(&self, topic: &str) -> DifficultyLevel {
        self.policy.select_difficulty(&self.ability, topic)
    }

    pub fn recommend(&mut self, pool: &[ItemRecord], count: usize) -> RecommendationBatch {
        self.policy.recommend(pool, count, &self.ability)
    }

    // ==================== Queries ====================

    pub fn ability(&self, topic: &str) -> Option<f64> {
        self.ability.ability(topic)
    }

    pub fn mastery(&self, skill: &str) -> Option<f64> {
        self.tracer.mastery(skill)
    }

    pub fn domain_stats(&self, topic: &str) -> Option<DomainStats> {
        self.ability.domain_stats(topic)
    }

    pub fn weakest(&self, k: usize) -> Vec<(String, f64)> {
        self.ability.weakest(k)
    }

    pub fn strongest(&self, k: usize) -> Vec<(String, f64)> {
        self.ability.strongest(k)
    }

    pub fn estimated_scaled_score<S: AsRef<str>>(&self, topics: &[S]) -> Option<f64> {
        self.ability.estimated_scaled_score(topics)
    }

    /// Scaled score for a configured topic group.
    pub fn scaled_score_for_group(&self, group: &str) -> Option<f64> {
        let members = self.config.topic_groups.get(group)?;
        self.ability.estimated_scaled_score(members.as_slice())
    }

    pub fn export_abilities(&self) -> AbilityExport {
        self.ability.export()
    }

    pub fn export_mastery(&self) -> MasteryExport {
        self.tracer.export()
    }

    pub fn export_policy(&self) -> PolicyExport {
        self.policy.export()
    }

    // ==================== Snapshots ====================

    pub fn snapshot(&self) -> UserSnapshot {
        let mut snapshot = UserSnapshot::new(self.user_id.clone());
        snapshot.ability_by_topic = self.ability.snapshot();
        snapshot.mastery_params_by_skill = self.tracer.snapshot();
        snapshot.bandit_arms_by_topic = self.policy.arms_snapshot();
        snapshot.epsilon = self.policy.epsilon();
        snapshot.history = self.policy.history().to_vec();
        snapshot.responses_since_refit = self.responses_since_refit;
        snapshot
    }

    /// Replace state from a stored document. Missing or corrupt sections reset
    /// that subsystem to defaults; returns the names of corrupt sections.
    pub fn restore_snapshot(&mut self, value: &Value) -> Vec<&'static str> {
        let decoded = DecodedSnapshot::decode(&self.user_id, value);

        self.ability
            .restore(decoded.ability_by_topic.unwrap_or_default());
        self.tracer
            .restore(decoded.mastery_params_by_skill.unwrap_or_default());
        self.policy
            .restore_arms(decoded.bandit_arms_by_topic.unwrap_or_default());
        self.policy.restore_epsilon(
            decoded
                .epsilon
                .unwrap_or(self.config.policy.initial_epsilon),
        );
        self.policy
            .restore_history(decoded.history.unwrap_or_default());
        self.responses_since_refit = decoded.responses_since_refit.unwrap_or(0);

        decoded.corrupt_sections
    }

    fn schedule_save(&mut self) {
        self.revision += 1;
        let Some(writer) = &self.writer else {
            return;
        };
        match self.snapshot().to_value() {
            Ok(value) => {
                writer.tx.send_replace(Some((self.revision, value)));
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %self.user_id, "failed to encode snapshot");
            }
        }
    }

    /// Save the current state now, bypassing the background writer.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let value = self.snapshot().to_value()?;
        writer.persister.save(self.revision, &value).await
    }

    /// Drain the background writer and write the final state.
    pub async fn shutdown(mut self) -> Result<(), PersistenceError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let SnapshotWriter {
            persister,
            tx,
            handle,
        } = writer;
        drop(tx);
        handle
            .await
            .map_err(|e| PersistenceError::Backend(format!("snapshot writer failed: {e}")))?;

        let value = self.snapshot().to_value()?;
        persister.save(self.revision, &value).await
    }
}

fn validate_topics(topics: &[String]) -> Result<(), EngineError> {
    if topics.is_empty() {
        return Err(EngineError::EmptyTopicUniverse);
    }
    let mut seen = HashSet::with_capacity(topics.len());
    for topic in topics {
        if !seen.insert(topic.as_str()) {
            return Err(EngineError::DuplicateTopic(topic.clone()));
        }
    }
    Ok(())
}
