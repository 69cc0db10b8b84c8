//! Versioned per-user snapshot document.
//!
//! Every section is decoded on its own so that one missing or corrupt
//! sub-document only resets that subsystem.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ability::AbilityState;
use crate::decision::{BanditArm, SelectionEvent};
use crate::mastery::MasteryState;

pub const SNAPSHOT_VERSION: u32 = 1;

pub const SECTION_ABILITY: &str = "abilityByTopic";
pub const SECTION_MASTERY: &str = "masteryParamsBySkill";
pub const SECTION_ARMS: &str = "banditArmsByTopic";
pub const SECTION_EPSILON: &str = "epsilon";
pub const SECTION_HISTORY: &str = "history";
pub const SECTION_REFIT: &str = "responsesSinceRefit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub version: u32,
    pub user_id: String,
    /// Unix milliseconds.
    pub saved_at: i64,
    pub ability_by_topic: BTreeMap<String, AbilityState>,
    pub mastery_params_by_skill: BTreeMap<String, MasteryState>,
    pub bandit_arms_by_topic: BTreeMap<String, BanditArm>,
    pub epsilon: f64,
    pub history: Vec<SelectionEvent>,
    #[serde(default)]
    pub responses_since_refit: u32,
}

impl UserSnapshot {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            user_id: user_id.into(),
            saved_at: Utc::now().timestamp_millis(),
            ability_by_topic: BTreeMap::new(),
            mastery_params_by_skill: BTreeMap::new(),
            bandit_arms_by_topic: BTreeMap::new(),
            epsilon: 0.0,
            history: Vec::new(),
            responses_since_refit: 0,
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Sections recovered from a stored document; `None` means "use defaults".
#[derive(Debug, Clone, Default)]
pub struct DecodedSnapshot {
    pub version: Option<u32>,
    pub ability_by_topic: Option<BTreeMap<String, AbilityState>>,
    pub mastery_params_by_skill: Option<BTreeMap<String, MasteryState>>,
    pub bandit_arms_by_topic: Option<BTreeMap<String, BanditArm>>,
    pub epsilon: Option<f64>,
    pub history: Option<Vec<SelectionEvent>>,
    pub responses_since_refit: Option<u32>,
    /// Sections that were present but could not be decoded.
    pub corrupt_sections: Vec<&'static str>,
}

impl DecodedSnapshot {
    pub fn decode(user_id: &str, value: &Value) -> Self {
        let Some(doc) = value.as_object() else {
            tracing::warn!(user_id = %user_id, "snapshot is not an object, using defaults");
            return Self::default();
        };

        let mut decoded = Self {
            version: doc
                .get("version")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok()),
            ..Default::default()
        };

        match decoded.version {
            Some(v) if v > SNAPSHOT_VERSION => {
                tracing::warn!(
                    user_id = %user_id,
                    version = v,
                    supported = SNAPSHOT_VERSION,
                    "snapshot written by a newer schema, decoding known sections"
                );
            }
            None => {
                tracing::debug!(user_id = %user_id, "snapshot without version field");
            }
            _ => {}
        }

        decoded.ability_by_topic = decoded.section(user_id, doc.get(SECTION_ABILITY), SECTION_ABILITY);
        decoded.mastery_params_by_skill =
            decoded.section(user_id, doc.get(SECTION_MASTERY), SECTION_MASTERY);
        decoded.bandit_arms_by_topic = decoded.section(user_id, doc.get(SECTION_ARMS), SECTION_ARMS);
        decoded.epsilon = decoded
            .section::<f64>(user_id, doc.get(SECTION_EPSILON), SECTION_EPSILON)
            .filter(|e| e.is_finite());
        decoded.history = decoded.section(user_id, doc.get(SECTION_HISTORY), SECTION_HISTORY);
        decoded.responses_since_refit = decoded.section(user_id, doc.get(SECTION_REFIT), SECTION_REFIT);

        decoded
    }

    fn section<T: DeserializeOwned>(
        &mut self,
        user_id: &str,
        raw: Option<&Value>,
        name: &'static str,
    ) -> Option<T> {
        let raw = raw.filter(|v| !v.is_null())?;
        match serde_json::from_value(raw.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    user_id = %user_id,
                    section = name,
                    "corrupt snapshot section, falling back to defaults"
                );
                self.corrupt_sections.push(name);
                None
            }
        }
    }
}
