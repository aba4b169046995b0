use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::ids::{CharacterId, ConflictId};

/// What a conflict is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSubject {
    Relationship,
    Power,
    Ideology,
    Resources,
    Information,
    Territory,
    Honor,
    Other,
}

impl ConflictSubject {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "relationship" => Self::Relationship,
            "power" => Self::Power,
            "ideology" | "belief" | "values" => Self::Ideology,
            "resources" | "money" => Self::Resources,
            "information" | "secret" => Self::Information,
            "territory" | "land" => Self::Territory,
            "honor" | "honour" => Self::Honor,
            _ => Self::Other,
        }
    }
}

/// How many people a conflict reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictScope {
    Personal,
    Group,
    Societal,
}

impl ConflictScope {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "group" => Self::Group,
            "societal" | "society" | "social" => Self::Societal,
            _ => Self::Personal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPhase {
    Emerging,
    Escalating,
    Peak,
    Resolving,
    Resolved,
}

impl ConflictPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emerging => "emerging",
            Self::Escalating => "escalating",
            Self::Peak => "peak",
            Self::Resolving => "resolving",
            Self::Resolved => "resolved",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "escalating" | "rising" => Self::Escalating,
            "peak" | "climax" => Self::Peak,
            "resolving" | "falling" => Self::Resolving,
            "resolved" => Self::Resolved,
            _ => Self::Emerging,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: ConflictId,
    pub name: String,
    pub involved_characters: Vec<CharacterId>,
    pub subject: ConflictSubject,
    pub scope: ConflictScope,
    pub phase: ConflictPhase,
    /// 0..=10
    pub strength: f64,
    #[serde(default)]
    pub timestamps: Vec<DateTime<Utc>>,
    pub description: Option<String>,
}

impl Conflict {
    pub fn new(
        id: impl Into<ConflictId>,
        name: impl Into<String>,
        involved: Vec<CharacterId>,
        strength: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            involved_characters: involved,
            subject: ConflictSubject::Other,
            scope: ConflictScope::Personal,
            phase: ConflictPhase::Emerging,
            strength,
            timestamps: Vec::new(),
            description: None,
        }
    }

    pub fn with_subject(mut self, subject: ConflictSubject, scope: ConflictScope) -> Self {
        self.subject = subject;
        self.scope = scope;
        self
    }

    pub fn with_phase(mut self, phase: ConflictPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamps.push(at);
        self
    }

    pub fn involves(&self, id: &CharacterId) -> bool {
        self.involved_characters.contains(id)
    }

    /// Most recent activity, if any was recorded.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().max().copied()
    }

    pub fn is_resolved(&self) -> bool {
        self.phase == ConflictPhase::Resolved
    }
}
