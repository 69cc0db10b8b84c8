use thiserror::Error;

/// Fatal misconfiguration detected while building an [`crate::Engine`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("topic universe is empty")]
    EmptyTopicUniverse,
    #[error("duplicate topic in universe: {0}")]
    DuplicateTopic(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Soft failures of a single model operation. These are logged and turned
/// into no-ops by the engine, never surfaced to the learner.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error(
        "insufficient data for {skill}: {skill_observations} skill / {total_observations} total observations"
    )]
    InsufficientData {
        skill: String,
        skill_observations: usize,
        total_observations: usize,
    },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors of the offline BKT training pipeline.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("failed to read reviews: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid review data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not enough data to train: {total} reviews (need {required})")]
    NotEnoughData { total: usize, required: usize },
}
