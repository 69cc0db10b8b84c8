//! Adaptive practice engine.
//!
//! Estimates a learner's per-topic ability (2PL item response model) and
//! per-skill mastery (Bayesian Knowledge Tracing with EM refits) from a stream
//! of right/wrong answers, and picks what to practice next with a
//! Thompson-sampling bandit.

pub mod ability;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mastery;
pub mod numeric;
pub mod persistence;
pub mod snapshot;
pub mod types;

pub use ability::{probability_correct, AbilityEstimator, AbilityExport, AbilityState};
pub use config::{AbilityConfig, EngineConfig, PolicyConfig, TracerConfig};
pub use decision::{BanditArm, BanditInsights, PolicyExport, SelectionEvent, SelectionPolicy};
pub use engine::{Engine, ResponseOutcome};
pub use error::{EngineError, ModelError, PersistenceError, TrainingError};
pub use mastery::{BktParams, EmFit, KnowledgeTracer, MasteryExport, MasteryState};
pub use persistence::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use snapshot::{UserSnapshot, SNAPSHOT_VERSION};
pub use types::{
    DifficultyLevel, DomainStats, ItemRecord, ProficiencyLevel, RecommendationBatch,
    ResponseEvent, SelectionRationale, WeaknessEntry,
};
