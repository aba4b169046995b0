//! Folding model output into the narrative graph.
//!
//! Model JSON is loose: characters may be plain names or objects, endpoints may
//! be ids or names, strengths may be missing or out of range. Anything that can't
//! be made to fit is skipped with a warning.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::models::{
    slug_id, CharacterId, Conflict, ConflictId, ConflictPhase, ConflictScope, ConflictSubject,
    NarrativeGraph, Relationship, RelationshipId, RelationshipType, MAX_STRENGTH, MIN_STRENGTH,
};

const DEFAULT_STRENGTH: f64 = 5.0;

/// What a merge added to the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub characters_added: usize,
    pub relationships_added: usize,
    pub conflicts_added: usize,
    pub skipped: usize,
}

fn clamp_strength(value: Option<&Value>) -> f64 {
    value
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite())
        .unwrap_or(DEFAULT_STRENGTH)
        .clamp(MIN_STRENGTH, MAX_STRENGTH)
}

fn str_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn timestamps(item: &Value, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let parsed: Vec<DateTime<Utc>> = item
        .get("timestamps")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
                .collect()
        })
        .unwrap_or_default();
    if parsed.is_empty() {
        vec![now]
    } else {
        parsed
    }
}

/// Resolve a reference that may be an id or a display name, creating the
/// character on first mention.
fn resolve_character(
    graph: &mut NarrativeGraph,
    reference: &str,
    summary: &mut MergeSummary,
) -> Option<CharacterId> {
    let direct = CharacterId::new(reference);
    if graph.contains_character(&direct) {
        return Some(direct);
    }
    let id = slug_id(reference);
    if id.as_str().is_empty() {
        return None;
    }
    if !graph.contains_character(&id) {
        summary.characters_added += 1;
    }
    graph.ensure_character(id.clone(), reference);
    Some(id)
}

fn merge_character(graph: &mut NarrativeGraph, item: &Value, summary: &mut MergeSummary) {
    let (name, explicit_id, description) = match item {
        Value::String(name) => (name.trim(), None, None),
        Value::Object(_) => match str_field(item, "name") {
            Some(name) => (name, str_field(item, "id"), str_field(item, "description")),
            None => {
                warn!("Skipping character without a name");
                summary.skipped += 1;
                return;
            }
        },
        _ => {
            summary.skipped += 1;
            return;
        }
    };
    let id = explicit_id.map(CharacterId::new).unwrap_or_else(|| slug_id(name));
    if id.as_str().is_empty() {
        summary.skipped += 1;
        return;
    }
    if !graph.contains_character(&id) {
        summary.characters_added += 1;
    }
    let character = graph.ensure_character(id, name);
    if character.description.is_none() {
        character.description = description.map(str::to_string);
    }
}

/// Register every character named in `result["characters"]`.
pub fn register_characters(graph: &mut NarrativeGraph, result: &Value) -> MergeSummary {
    let mut summary = MergeSummary::default();
    if let Some(items) = result.get("characters").and_then(Value::as_array) {
        for item in items {
            merge_character(graph, item, &mut summary);
        }
    }
    summary
}

/// Merge `characters`, `relationships` and `conflicts` from a network result.
pub fn merge_network(graph: &mut NarrativeGraph, result: &Value, now: DateTime<Utc>) -> MergeSummary {
    let mut summary = register_characters(graph, result);

    for item in result
        .get("relationships")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let (Some(source), Some(target)) = (str_field(item, "source"), str_field(item, "target"))
        else {
            warn!("Skipping relationship without both endpoints");
            summary.skipped += 1;
            continue;
        };
        let (Some(source), Some(target)) = (
            resolve_character(graph, source, &mut summary),
            resolve_character(graph, target, &mut summary),
        ) else {
            summary.skipped += 1;
            continue;
        };
        let id = str_field(item, "id")
            .map(RelationshipId::new)
            .unwrap_or_else(RelationshipId::generate);
        let mut relationship = Relationship::new(
            id,
            source,
            target,
            RelationshipType::from_label(str_field(item, "type").unwrap_or("other")),
            clamp_strength(item.get("strength")),
        );
        relationship.timestamps = timestamps(item, now);
        relationship.description = str_field(item, "description").map(str::to_string);
        match graph.add_relationship(relationship) {
            Ok(()) => summary.relationships_added += 1,
            Err(e) => {
                warn!(error = %e, "Skipping relationship");
                summary.skipped += 1;
            }
        }
    }

    for item in result
        .get("conflicts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(name) = str_field(item, "name") else {
            warn!("Skipping conflict without a name");
            summary.skipped += 1;
            continue;
        };
        let involved: Vec<CharacterId> = item
            .get("involvedCharacters")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter_map(|r| resolve_character(graph, r.trim(), &mut summary))
            .collect();
        let id = str_field(item, "id")
            .map(ConflictId::new)
            .unwrap_or_else(ConflictId::generate);
        let mut conflict = Conflict::new(id, name, involved, clamp_strength(item.get("strength")))
            .with_subject(
                ConflictSubject::from_label(str_field(item, "subject").unwrap_or("other")),
                ConflictScope::from_label(str_field(item, "scope").unwrap_or("personal")),
            )
            .with_phase(ConflictPhase::from_label(str_field(item, "phase").unwrap_or("emerging")));
        conflict.timestamps = timestamps(item, now);
        conflict.description = str_field(item, "description").map(str::to_string);
        match graph.add_conflict(conflict) {
            Ok(()) => summary.conflicts_added += 1,
            Err(e) => {
                warn!(error = %e, "Skipping conflict");
                summary.skipped += 1;
            }
        }
    }

    summary
}
