use serde::{Deserialize, Serialize};

/// Item difficulty category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl DifficultyLevel {
    pub const ALL: [DifficultyLevel; 3] = [Self::Easy, Self::Medium, Self::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    /// Fixed 2PL difficulty parameter `b`.
    pub fn irt_b(&self) -> f64 {
        match self {
            Self::Easy => -1.0,
            Self::Medium => 0.0,
            Self::Hard => 1.5,
        }
    }
}

impl std::fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProficiencyLevel {
    Advanced,
    Proficient,
    Developing,
    Basic,
    #[serde(rename = "Below Basic")]
    BelowBasic,
}

impl ProficiencyLevel {
    pub fn from_theta(theta: f64) -> Self {
        if theta >= 2.0 {
            Self::Advanced
        } else if theta >= 1.0 {
            Self::Proficient
        } else if theta >= 0.0 {
            Self::Developing
        } else if theta >= -1.0 {
            Self::Basic
        } else {
            Self::BelowBasic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advanced => "Advanced",
            Self::Proficient => "Proficient",
            Self::Developing => "Developing",
            Self::Basic => "Basic",
            Self::BelowBasic => "Below Basic",
        }
    }
}

/// A practice item as supplied by the content repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: String,
    pub topic: String,
    pub difficulty: DifficultyLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrimination: Option<f64>,
}

/// One answered item delivered by the session layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    pub topic: String,
    pub correct: bool,
    pub difficulty: DifficultyLevel,
    pub response_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discrimination: Option<f64>,
}

impl ResponseEvent {
    pub fn new(
        topic: impl Into<String>,
        correct: bool,
        difficulty: DifficultyLevel,
        response_time_seconds: f64,
    ) -> Self {
        Self {
            topic: topic.into(),
            correct,
            difficulty,
            response_time_seconds,
            discrimination: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStats {
    pub topic: String,
    pub theta: f64,
    pub attempts: u32,
    pub correct: u32,
    pub accuracy: f64,
    /// Standard-normal percentile of theta, 0–100.
    pub percentile: f64,
    pub proficiency_level: ProficiencyLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRationale {
    pub topic: String,
    pub difficulty: DifficultyLevel,
    pub theta: f64,
    pub explored: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaknessEntry {
    pub topic: String,
    pub theta: f64,
    pub level: ProficiencyLevel,
}

/// Output of `recommend`. May hold fewer items than requested when the pool
/// has no candidate for a drawn (topic, difficulty) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationBatch {
    pub items: Vec<ItemRecord>,
    pub rationale: Vec<SelectionRationale>,
    pub weakness_summary: Vec<WeaknessEntry>,
}

impl RecommendationBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
