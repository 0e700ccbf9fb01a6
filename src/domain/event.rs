//! Event configuration.
//!
//! An event is one recorded session. Its `modules` mapping lists step names
//! with an enabled flag; the mapping's declared order is the execution order.
//! Everything else is metadata that handlers may read and the executor ignores.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ordered::OrderedMap;

/// Step names understood by the built-in registry, in their default order
pub const STEP_CATALOG: &[&str] = &[
    "thumbnail_ai",
    "thumbnail_compose",
    "subtitles",
    "publish_youtube",
    "publish_website",
    "archive",
];

/// Configuration of a single event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    /// Stable identifier, e.g. "2026-01-26_0900_sunday-service"
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub speaker: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripture: Option<String>,

    /// Spoken language code, or "auto" for detection
    #[serde(default = "default_language")]
    pub language: String,

    /// Speech-to-text model size
    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Attached input files
    #[serde(default)]
    pub inputs: EventInputs,

    /// Step name -> enabled, in execution order
    #[serde(default)]
    pub modules: OrderedMap<bool>,

    /// Any other metadata, preserved on save
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_language() -> String {
    "auto".to_string()
}

fn default_whisper_model() -> String {
    "base".to_string()
}

/// Input files attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventInputs {
    #[serde(default)]
    pub video_files: Vec<PathBuf>,
}

impl EventConfig {
    /// Create an event with every catalog step enabled
    pub fn new(id: impl Into<String>, title: impl Into<String>, speaker: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            speaker: speaker.into(),
            series: None,
            scripture: None,
            language: default_language(),
            whisper_model: default_whisper_model(),
            created_at: Some(Utc::now()),
            inputs: EventInputs::default(),
            modules: STEP_CATALOG.iter().map(|name| (*name, true)).collect(),
            extra: BTreeMap::new(),
        }
    }

    /// Names of enabled steps, in declared order
    pub fn enabled_steps(&self) -> Vec<String> {
        self.modules
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// First attached video, if any
    pub fn primary_video(&self) -> Option<&PathBuf> {
        self.inputs.video_files.first()
    }
}
