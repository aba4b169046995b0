use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::ids::{CharacterId, RelationshipId};

/// Kind of bond between two characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Family,
    Friendship,
    Romantic,
    Professional,
    Antagonistic,
    Mentorship,
    Other,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Family => "family",
            Self::Friendship => "friendship",
            Self::Romantic => "romantic",
            Self::Professional => "professional",
            Self::Antagonistic => "antagonistic",
            Self::Mentorship => "mentorship",
            Self::Other => "other",
        }
    }

    /// Lenient parse for model output. Unknown labels map to `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "family" => Self::Family,
            "friendship" | "friend" => Self::Friendship,
            "romantic" | "romance" | "love" => Self::Romantic,
            "professional" | "work" => Self::Professional,
            "antagonistic" | "rivalry" | "enemy" | "hostile" => Self::Antagonistic,
            "mentorship" | "mentor" => Self::Mentorship,
            _ => Self::Other,
        }
    }
}

/// Relationship between two characters.
///
/// Stored with a direction but undirected for connectivity: `A→B` and `B→A`
/// describe the same pair.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub source: CharacterId,
    pub target: CharacterId,
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    /// 0..=10
    pub strength: f64,
    #[serde(default)]
    pub timestamps: Vec<DateTime<Utc>>,
    pub description: Option<String>,
}

impl Relationship {
    pub fn new(
        id: impl Into<RelationshipId>,
        source: impl Into<CharacterId>,
        target: impl Into<CharacterId>,
        kind: RelationshipType,
        strength: f64,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            kind,
            strength,
            timestamps: Vec::new(),
            description: None,
        }
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamps.push(at);
        self
    }

    pub fn involves(&self, id: &CharacterId) -> bool {
        &self.source == id || &self.target == id
    }

    /// The endpoint opposite `id`, if `id` is an endpoint.
    pub fn other_end(&self, id: &CharacterId) -> Option<&CharacterId> {
        if &self.source == id {
            Some(&self.target)
        } else if &self.target == id {
            Some(&self.source)
        } else {
            None
        }
    }

    /// Endpoints in a direction-independent order.
    pub fn endpoint_pair(&self) -> (&CharacterId, &CharacterId) {
        if self.source <= self.target {
            (&self.source, &self.target)
        } else {
            (&self.target, &self.source)
        }
    }
}
