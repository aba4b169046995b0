//! The narrative graph: characters, relationships and conflicts in three
//! id-keyed maps, cross-referenced by id only.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::character::Character;
use super::conflict::Conflict;
use super::ids::{CharacterId, ConflictId, RelationshipId};
use super::relationship::Relationship;
use crate::error::StationsError;

pub const MIN_STRENGTH: f64 = 0.0;
pub const MAX_STRENGTH: f64 = 10.0;

/// A reference from a relationship or conflict to a character that is not in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    pub entity_type: &'static str,
    pub entity_id: String,
    pub missing: CharacterId,
}

impl From<DanglingReference> for StationsError {
    fn from(d: DanglingReference) -> Self {
        StationsError::GraphInconsistency {
            entity_type: d.entity_type.to_string(),
            entity_id: d.entity_id,
            missing: d.missing.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeGraph {
    #[serde(default)]
    characters: BTreeMap<CharacterId, Character>,
    #[serde(default)]
    relationships: BTreeMap<RelationshipId, Relationship>,
    #[serde(default)]
    conflicts: BTreeMap<ConflictId, Conflict>,
}

fn check_strength(entity: &str, id: &str, strength: f64) -> Result<(), StationsError> {
    if !strength.is_finite() || !(MIN_STRENGTH..=MAX_STRENGTH).contains(&strength) {
        return Err(StationsError::Validation(format!(
            "{entity} '{id}' has strength {strength}, expected {MIN_STRENGTH}..={MAX_STRENGTH}"
        )));
    }
    Ok(())
}

impl NarrativeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    pub fn add_character(&mut self, character: Character) -> Result<(), StationsError> {
        if self.characters.contains_key(&character.id) {
            return Err(StationsError::Validation(format!(
                "character '{}' already exists",
                character.id
            )));
        }
        self.characters.insert(character.id.clone(), character);
        Ok(())
    }

    /// Return the character with `id`, creating it with `name` on first mention.
    pub fn ensure_character(&mut self, id: CharacterId, name: &str) -> &mut Character {
        self.characters
            .entry(id.clone())
            .or_insert_with(|| Character::new(id, name))
    }

    pub fn add_relationship(&mut self, relationship: Relationship) -> Result<(), StationsError> {
        check_strength("relationship", relationship.id.as_str(), relationship.strength)?;
        if relationship.source == relationship.target {
            return Err(StationsError::Validation(format!(
                "relationship '{}' connects '{}' to itself",
                relationship.id, relationship.source
            )));
        }
        if self.relationships.contains_key(&relationship.id) {
            return Err(StationsError::Validation(format!(
                "relationship '{}' already exists",
                relationship.id
            )));
        }
        for endpoint in [&relationship.source, &relationship.target] {
            if !self.characters.contains_key(endpoint) {
                return Err(DanglingReference {
                    entity_type: "relationship",
                    entity_id: relationship.id.to_string(),
                    missing: endpoint.clone(),
                }
                .into());
            }
        }
        self.relationships
            .insert(relationship.id.clone(), relationship);
        Ok(())
    }

    pub fn add_conflict(&mut self, mut conflict: Conflict) -> Result<(), StationsError> {
        check_strength("conflict", conflict.id.as_str(), conflict.strength)?;
        if self.conflicts.contains_key(&conflict.id) {
            return Err(StationsError::Validation(format!(
                "conflict '{}' already exists",
                conflict.id
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        conflict.involved_characters.retain(|id| seen.insert(id.clone()));
        if let Some(missing) = conflict
            .involved_characters
            .iter()
            .find(|id| !self.characters.contains_key(*id))
        {
            return Err(DanglingReference {
                entity_type: "conflict",
                entity_id: conflict.id.to_string(),
                missing: missing.clone(),
            }
            .into());
        }
        self.conflicts.insert(conflict.id.clone(), conflict);
        Ok(())
    }

    /// Record activity on a relationship.
    pub fn touch_relationship(
        &mut self,
        id: &RelationshipId,
        at: DateTime<Utc>,
    ) -> Result<(), StationsError> {
        let relationship = self.relationships.get_mut(id).ok_or_else(|| StationsError::NotFound {
            entity_type: "relationship".into(),
            id: id.to_string(),
        })?;
        relationship.timestamps.push(at);
        Ok(())
    }

    /// Record activity on a conflict.
    pub fn touch_conflict(&mut self, id: &ConflictId, at: DateTime<Utc>) -> Result<(), StationsError> {
        let conflict = self.conflicts.get_mut(id).ok_or_else(|| StationsError::NotFound {
            entity_type: "conflict".into(),
            id: id.to_string(),
        })?;
        conflict.timestamps.push(at);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn character(&self, id: &CharacterId) -> Option<&Character> {
        self.characters.get(id)
    }

    pub fn relationship(&self, id: &RelationshipId) -> Option<&Relationship> {
        self.relationships.get(id)
    }

    pub fn conflict(&self, id: &ConflictId) -> Option<&Conflict> {
        self.conflicts.get(id)
    }

    pub fn contains_character(&self, id: &CharacterId) -> bool {
        self.characters.contains_key(id)
    }

    pub fn characters(&self) -> impl Iterator<Item = &Character> {
        self.characters.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.values()
    }

    pub fn character_count(&self) -> usize {
        self.characters.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.relationships.is_empty() && self.conflicts.is_empty()
    }

    /// Relationships touching `id`.
    pub fn relationships_of<'a>(
        &'a self,
        id: &'a CharacterId,
    ) -> impl Iterator<Item = &'a Relationship> + 'a {
        self.relationships.values().filter(move |r| r.involves(id))
    }

    /// Conflicts `id` is involved in.
    pub fn conflicts_of<'a>(&'a self, id: &'a CharacterId) -> impl Iterator<Item = &'a Conflict> + 'a {
        self.conflicts.values().filter(move |c| c.involves(id))
    }

    /// Whether both endpoints of `relationship` exist.
    pub fn is_resolvable(&self, relationship: &Relationship) -> bool {
        self.characters.contains_key(&relationship.source)
            && self.characters.contains_key(&relationship.target)
    }

    /// References to characters that are not in the graph. Empty for graphs built
    /// through `add_*`; deserialized graphs may have some.
    pub fn inconsistencies(&self) -> Vec<DanglingReference> {
        let mut found = Vec::new();
        for rel in self.relationships.values() {
            for endpoint in [&rel.source, &rel.target] {
                if !self.characters.contains_key(endpoint) {
                    found.push(DanglingReference {
                        entity_type: "relationship",
                        entity_id: rel.id.to_string(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }
        for conflict in self.conflicts.values() {
            for id in &conflict.involved_characters {
                if !self.characters.contains_key(id) {
                    found.push(DanglingReference {
                        entity_type: "conflict",
                        entity_id: conflict.id.to_string(),
                        missing: id.clone(),
                    });
                }
            }
        }
        found
    }

    // -------------------------------------------------------------------------
    // Serialization
    // -------------------------------------------------------------------------

    pub fn to_json(&self) -> Result<String, StationsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StationsError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Graph shared between stations. Readers take a point-in-time [`snapshot`](Self::snapshot).
#[derive(Debug, Clone, Default)]
pub struct SharedGraph(Arc<RwLock<NarrativeGraph>>);

impl SharedGraph {
    pub fn new(graph: NarrativeGraph) -> Self {
        Self(Arc::new(RwLock::new(graph)))
    }

    pub async fn snapshot(&self) -> NarrativeGraph {
        self.0.read().await.clone()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, NarrativeGraph> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, NarrativeGraph> {
        self.0.write().await
    }
}
