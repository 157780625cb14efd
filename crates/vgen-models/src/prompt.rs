//! Prompt definitions.
//!
//! A [`Prompt`] is the immutable unit of generation work: free-form text,
//! a quality profile selecting the provider tier, a target duration and
//! its position in the caller's sequence.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a prompt. Generation jobs share this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct PromptId(pub String);

impl PromptId {
    /// Generate a new random prompt ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PromptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quality/version profile.
///
/// Selects the provider tier used for generation. The profile is part of
/// the cache key, so the same text rendered at two profiles is two assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityProfile {
    /// Fast, low-resolution preview renders.
    Draft,

    /// Default production tier.
    #[default]
    Standard,

    /// Highest fidelity tier, slowest and most expensive.
    Premium,
}

impl QualityProfile {
    /// All available profiles.
    pub const ALL: &'static [QualityProfile] = &[
        QualityProfile::Draft,
        QualityProfile::Standard,
        QualityProfile::Premium,
    ];

    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityProfile::Draft => "draft",
            QualityProfile::Standard => "standard",
            QualityProfile::Premium => "premium",
        }
    }
}

impl fmt::Display for QualityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QualityProfile {
    type Err = QualityProfileParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" | "preview" => Ok(QualityProfile::Draft),
            "standard" => Ok(QualityProfile::Standard),
            "premium" | "pro" => Ok(QualityProfile::Premium),
            _ => Err(QualityProfileParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown quality profile: {0}")]
pub struct QualityProfileParseError(String);

fn default_duration_secs() -> u32 {
    5
}

/// A text prompt to be turned into a video asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Prompt {
    /// Unique prompt ID (also the generation job ID)
    #[serde(default)]
    pub id: PromptId,
    /// Free-form prompt text
    pub text: String,
    /// Quality profile
    #[serde(default)]
    pub profile: QualityProfile,
    /// Target clip duration in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u32,
    /// Position in the caller's sequence
    #[serde(default)]
    pub sequence: u32,
}

impl Prompt {
    /// Create a new prompt with a fresh id, the standard profile and a 5s duration.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: PromptId::new(),
            text: text.into(),
            profile: QualityProfile::default(),
            duration_secs: default_duration_secs(),
            sequence: 0,
        }
    }

    /// Set the quality profile.
    pub fn with_profile(mut self, profile: QualityProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the target duration.
    pub fn with_duration(mut self, duration_secs: u32) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    /// Set the sequence index.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }
}
