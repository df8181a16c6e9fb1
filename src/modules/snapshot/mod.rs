//! Daily-note payload and the timestamped snapshot built from it.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Expedition state. Unknown remote values are preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExpeditionStatus {
    Ongoing,
    Finished,
    Other(String),
}

impl From<String> for ExpeditionStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Ongoing" => ExpeditionStatus::Ongoing,
            "Finished" => ExpeditionStatus::Finished,
            _ => ExpeditionStatus::Other(raw),
        }
    }
}

impl From<ExpeditionStatus> for String {
    fn from(status: ExpeditionStatus) -> Self {
        match status {
            ExpeditionStatus::Ongoing => "Ongoing".into(),
            ExpeditionStatus::Finished => "Finished".into(),
            ExpeditionStatus::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expedition {
    #[serde(default)]
    pub avatars: Vec<String>,
    pub status: ExpeditionStatus,
    /// Seconds until the expedition returns.
    #[serde(deserialize_with = "seconds_from_string_or_number")]
    pub remaining_time: u64,
    #[serde(default)]
    pub name: String,
}

/// Resource counters as returned by the note endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyNote {
    pub current_stamina: u32,
    pub max_stamina: u32,
    /// Seconds until stamina is full. Signed: local projection does not clamp it.
    #[serde(default)]
    pub stamina_recover_time: i64,
    // Field name follows the remote spelling.
    #[serde(default)]
    pub accepted_epedition_num: u32,
    #[serde(default)]
    pub total_expedition_num: u32,
    #[serde(default)]
    pub expeditions: Vec<Expedition>,
    #[serde(default)]
    pub current_train_score: u32,
    #[serde(default)]
    pub max_train_score: u32,
    #[serde(default)]
    pub current_rogue_score: u32,
    #[serde(default)]
    pub max_rogue_score: u32,
    #[serde(default)]
    pub weekly_cocoon_cnt: u32,
    #[serde(default)]
    pub weekly_cocoon_limit: u32,
    #[serde(default)]
    pub current_reserve_stamina: u32,
    #[serde(default)]
    pub is_reserve_stamina_full: bool,
}

/// Immutable capture of a note at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub note: DailyNote,
    pub captured_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    pub fn new(note: DailyNote, captured_at: DateTime<Utc>) -> Self {
        Self { note, captured_at }
    }
}

fn seconds_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(num) => num
            .as_u64()
            .or_else(|| num.as_f64().map(|f| f.max(0.0) as u64))
            .ok_or_else(|| de::Error::custom("invalid remaining_time")),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            trimmed
                .parse::<u64>()
                .ok()
                .or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.max(0.0) as u64)
                })
                .ok_or_else(|| de::Error::custom(format!("invalid remaining_time '{raw}'")))
        }
        other => Err(de::Error::custom(format!(
            "expected string or number for remaining_time, got {other}"
        ))),
    }
}
