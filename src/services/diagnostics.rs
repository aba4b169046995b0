//! Structural diagnostics over a narrative graph snapshot.
//!
//! Runs a fixed battery of read-only analyses (connectivity, critical nodes,
//! isolation, abandoned conflicts, overload, weak links, redundancy) and folds the
//! findings into a 0-100 health score. Suggestions in the report are advisory text;
//! nothing here mutates the graph.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DiagnosticsConfig;
use crate::models::{
    CharacterId, Conflict, ConflictId, DanglingReference, NarrativeGraph, Relationship,
    RelationshipId,
};

// ============================================================================
// Report Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalityLevel {
    Healthy,
    MinorIssues,
    ModerateIssues,
    MajorIssues,
    Critical,
}

impl CriticalityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::MinorIssues => "minor_issues",
            Self::ModerateIssues => "moderate_issues",
            Self::MajorIssues => "major_issues",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralIssueType {
    DisconnectedComponents,
    SinglePointFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralIssue {
    #[serde(rename = "type")]
    pub kind: StructuralIssueType,
    pub severity: Severity,
    pub description: String,
    pub affected_elements: Vec<CharacterId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationType {
    /// No relationships and no conflicts. The only tier that costs health.
    CompletelyIsolated,
    WeaklyConnected,
    ConflictIsolated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolatedCharacterIssue {
    pub character_name: String,
    pub character_id: CharacterId,
    pub isolation_type: IsolationType,
    pub suggested_connections: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolatedCharacters {
    pub total_isolated: usize,
    pub characters: Vec<IsolatedCharacterIssue>,
}

impl IsolatedCharacters {
    pub fn completely_isolated(&self) -> usize {
        self.characters
            .iter()
            .filter(|c| c.isolation_type == IsolationType::CompletelyIsolated)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonedReason {
    StuckInPhase,
    WeakInvolvement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbandonedConflictIssue {
    pub conflict_name: String,
    pub conflict_id: ConflictId,
    /// Every reason that applies. The conflict still counts once.
    pub issue_types: Vec<AbandonedReason>,
    pub days_inactive: i64,
    pub suggested_actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbandonedConflicts {
    pub total_abandoned: usize,
    pub conflicts: Vec<AbandonedConflictIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverloadType {
    TooManyConflicts,
    TooManyRelationships,
    CentralBottleneck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverloadedCharacterIssue {
    pub character_name: String,
    pub character_id: CharacterId,
    pub overload_type: OverloadType,
    pub current_load: usize,
    pub recommended_load: usize,
    pub suggested_distribution: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverloadedCharacters {
    pub total_overloaded: usize,
    pub characters: Vec<OverloadedCharacterIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Relationship,
    ConflictInvolvement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakConnectionIssue {
    pub connection_type: ConnectionType,
    pub element_id: String,
    pub weakness: String,
    pub strength_score: f64,
    pub improvement_suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakConnections {
    pub total_weak: usize,
    pub connections: Vec<WeakConnectionIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedundancyType {
    DuplicateRelationships,
    SimilarConflicts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedundancyIssue {
    pub redundancy_type: RedundancyType,
    pub affected_elements: Vec<String>,
    pub redundancy_score: f64,
    pub consolidation_suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redundancies {
    pub total_redundant: usize,
    pub items: Vec<RedundancyIssue>,
}

/// Consolidated diagnostics for one graph snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub overall_health_score: u32,
    pub criticality_level: CriticalityLevel,
    pub structural_issues: Vec<StructuralIssue>,
    pub isolated_characters: IsolatedCharacters,
    pub abandoned_conflicts: AbandonedConflicts,
    pub overloaded_characters: OverloadedCharacters,
    pub weak_connections: WeakConnections,
    pub redundancies: Redundancies,
    /// Connected components, each sorted, in order of their first member.
    pub components: Vec<Vec<CharacterId>>,
    /// References to missing characters that were skipped.
    #[serde(default, skip_deserializing)]
    pub skipped_references: Vec<DanglingReference>,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Scoring
// ============================================================================

pub const STRUCTURAL_WEIGHT: i64 = 15;
pub const ISOLATED_WEIGHT: i64 = 10;
pub const ABANDONED_WEIGHT: i64 = 8;
pub const OVERLOADED_WEIGHT: i64 = 12;
pub const WEAK_WEIGHT: i64 = 5;
pub const REDUNDANCY_WEIGHT: i64 = 7;

/// Issue counts that feed the health score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssueCounts {
    pub structural: usize,
    pub isolated: usize,
    pub abandoned: usize,
    pub overloaded: usize,
    pub weak: usize,
    pub redundant: usize,
}

/// 100 minus weighted issue counts, floored at 0.
pub fn health_score(counts: &IssueCounts) -> u32 {
    let penalty = STRUCTURAL_WEIGHT * counts.structural as i64
        + ISOLATED_WEIGHT * counts.isolated as i64
        + ABANDONED_WEIGHT * counts.abandoned as i64
        + OVERLOADED_WEIGHT * counts.overloaded as i64
        + WEAK_WEIGHT * counts.weak as i64
        + REDUNDANCY_WEIGHT * counts.redundant as i64;
    (100 - penalty).max(0) as u32
}

pub fn criticality_for(score: u32) -> CriticalityLevel {
    match score {
        85.. => CriticalityLevel::Healthy,
        70..=84 => CriticalityLevel::MinorIssues,
        50..=69 => CriticalityLevel::ModerateIssues,
        30..=49 => CriticalityLevel::MajorIssues,
        _ => CriticalityLevel::Critical,
    }
}

// ---------------------------------------------------------------------------
// Pure functions
// ---------------------------------------------------------------------------

/// Fixed precedence for characters with few ties:
/// no ties at all, then no relationships, then at most one relationship, then no conflicts.
pub fn classify_isolation(relationships: usize, conflicts: usize) -> Option<IsolationType> {
    match (relationships, conflicts) {
        (0, 0) => Some(IsolationType::CompletelyIsolated),
        (0, _) => Some(IsolationType::WeaklyConnected),
        (1, 0) => Some(IsolationType::WeaklyConnected),
        (_, 0) => Some(IsolationType::ConflictIsolated),
        _ => None,
    }
}

/// Whole days since the conflict's latest timestamp, rounded up. 365 when it has none.
pub fn days_inactive(conflict: &Conflict, now: DateTime<Utc>) -> i64 {
    const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
    match conflict.last_activity() {
        None => 365,
        Some(last) => {
            let ms = (now - last).num_milliseconds().abs();
            (ms + MS_PER_DAY - 1) / MS_PER_DAY
        }
    }
}

fn relationships_duplicate(a: &Relationship, b: &Relationship) -> bool {
    a.kind == b.kind && a.endpoint_pair() == b.endpoint_pair()
}

fn conflicts_similar(a: &Conflict, b: &Conflict) -> bool {
    a.subject == b.subject
        && a.scope == b.scope
        && a.involved_characters
            .iter()
            .any(|c| b.involved_characters.contains(c))
}

fn connection_suggestion(name: &str) -> String {
    format!("Connect with {name}")
}

fn involvement_suggestion(conflict_name: &str) -> String {
    format!("Involve in conflict: {conflict_name}")
}

fn conflict_actions(conflict: &Conflict) -> Vec<String> {
    vec![
        format!("Advance the conflict past its {} phase", conflict.phase.as_str()),
        "Add a new turning point".to_string(),
        "Deepen the involved characters' stake in it".to_string(),
        "Tie the conflict to other conflicts".to_string(),
    ]
}

fn load_distribution(overload: OverloadType) -> Vec<String> {
    let mut suggestions = match overload {
        OverloadType::TooManyConflicts => vec!["Split the larger conflicts".to_string()],
        OverloadType::TooManyRelationships => {
            vec!["Move some relationships to other characters".to_string()]
        }
        OverloadType::CentralBottleneck => vec![
            "Move some relationships to other characters".to_string(),
            "Split the larger conflicts".to_string(),
        ],
    };
    suggestions.push("Introduce supporting characters".to_string());
    suggestions
}

// ============================================================================
// Engine
// ============================================================================

/// Per-character adjacency over resolvable relationships and known conflict members.
struct GraphIndex<'a> {
    relationships: BTreeMap<&'a CharacterId, Vec<&'a Relationship>>,
    conflicts: BTreeMap<&'a CharacterId, Vec<&'a Conflict>>,
    valid_relationships: Vec<&'a Relationship>,
}

impl<'a> GraphIndex<'a> {
    fn build(graph: &'a NarrativeGraph) -> Self {
        let mut relationships: BTreeMap<&CharacterId, Vec<&Relationship>> =
            graph.characters().map(|c| (&c.id, Vec::new())).collect();
        let mut conflicts: BTreeMap<&CharacterId, Vec<&Conflict>> =
            graph.characters().map(|c| (&c.id, Vec::new())).collect();
        let mut valid_relationships = Vec::new();

        for rel in graph.relationships() {
            if !graph.is_resolvable(rel) || rel.source == rel.target {
                continue;
            }
            valid_relationships.push(rel);
            for endpoint in [&rel.source, &rel.target] {
                if let Some(list) = relationships.get_mut(endpoint) {
                    list.push(rel);
                }
            }
        }
        for conflict in graph.conflicts() {
            let members: BTreeSet<&CharacterId> = conflict.involved_characters.iter().collect();
            for id in members {
                if let Some(list) = conflicts.get_mut(id) {
                    list.push(conflict);
                }
            }
        }

        Self {
            relationships,
            conflicts,
            valid_relationships,
        }
    }

    fn degree(&self, id: &CharacterId) -> usize {
        self.relationships.get(id).map_or(0, Vec::len)
    }

    fn conflict_count(&self, id: &CharacterId) -> usize {
        self.conflicts.get(id).map_or(0, Vec::len)
    }

    fn neighbors(&self, id: &CharacterId) -> BTreeSet<&'a CharacterId> {
        self.relationships
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|r| r.other_end(id))
            .collect()
    }
}

/// Undirected connected components over relationships (iterative DFS).
/// Characters without relationships are singletons. Members are sorted.
pub fn connected_components(graph: &NarrativeGraph) -> Vec<Vec<CharacterId>> {
    let index = GraphIndex::build(graph);
    components_of(graph, &index)
}

fn components_of(graph: &NarrativeGraph, index: &GraphIndex<'_>) -> Vec<Vec<CharacterId>> {
    let mut visited: BTreeSet<&CharacterId> = BTreeSet::new();
    let mut components = Vec::new();

    for start in graph.characters().map(|c| &c.id) {
        if visited.contains(start) {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            component.push(current.clone());
            for next in index.neighbors(current) {
                if !visited.contains(next) {
                    stack.push(next);
                }
            }
        }
        component.sort();
        components.push(component);
    }
    components
}

/// Characters with relationship degree of at least `min_degree`.
pub fn critical_nodes(graph: &NarrativeGraph, min_degree: usize) -> Vec<CharacterId> {
    let index = GraphIndex::build(graph);
    critical_nodes_of(graph, &index, min_degree)
}

fn critical_nodes_of(
    graph: &NarrativeGraph,
    index: &GraphIndex<'_>,
    min_degree: usize,
) -> Vec<CharacterId> {
    graph
        .characters()
        .filter(|c| index.degree(&c.id) >= min_degree)
        .map(|c| c.id.clone())
        .collect()
}

/// Runs every analysis over a graph snapshot.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsEngine {
    config: DiagnosticsConfig,
}

impl DiagnosticsEngine {
    pub fn new(config: DiagnosticsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    pub fn run_all_diagnostics(&self, graph: &NarrativeGraph) -> DiagnosticsReport {
        self.run_at(graph, Utc::now())
    }

    /// Deterministic core: all time-based checks are relative to `now`.
    pub fn run_at(&self, graph: &NarrativeGraph, now: DateTime<Utc>) -> DiagnosticsReport {
        let skipped_references = graph.inconsistencies();
        if !skipped_references.is_empty() {
            tracing::warn!(
                "Diagnostics skipping {} dangling reference(s)",
                skipped_references.len()
            );
        }

        let index = GraphIndex::build(graph);
        let components = components_of(graph, &index);

        let structural_issues = self.structural_issues(graph, &index, &components);
        let isolated_characters = self.isolated_characters(graph, &index);
        let abandoned_conflicts = self.abandoned_conflicts(graph, now);
        let overloaded_characters = self.overloaded_characters(graph, &index);
        let weak_connections = self.weak_connections(graph, &index);
        let redundancies = self.redundancies(graph, &index);

        let counts = IssueCounts {
            structural: structural_issues.len(),
            isolated: isolated_characters.completely_isolated(),
            abandoned: abandoned_conflicts.total_abandoned,
            overloaded: overloaded_characters.total_overloaded,
            weak: weak_connections.total_weak,
            redundant: redundancies.total_redundant,
        };
        let overall_health_score = health_score(&counts);
        let criticality_level = criticality_for(overall_health_score);

        tracing::info!(
            "Diagnostics: score {} ({}) over {} characters, {} relationships, {} conflicts",
            overall_health_score,
            criticality_level.as_str(),
            graph.character_count(),
            graph.relationship_count(),
            graph.conflict_count()
        );

        DiagnosticsReport {
            overall_health_score,
            criticality_level,
            structural_issues,
            isolated_characters,
            abandoned_conflicts,
            overloaded_characters,
            weak_connections,
            redundancies,
            components,
            skipped_references,
            generated_at: now,
        }
    }

    fn structural_issues(
        &self,
        graph: &NarrativeGraph,
        index: &GraphIndex<'_>,
        components: &[Vec<CharacterId>],
    ) -> Vec<StructuralIssue> {
        let mut issues = Vec::new();

        let groups: Vec<&Vec<CharacterId>> = components.iter().filter(|c| c.len() >= 2).collect();
        if groups.len() >= 2 {
            issues.push(StructuralIssue {
                kind: StructuralIssueType::DisconnectedComponents,
                severity: Severity::High,
                description: format!(
                    "The network is split into {} disconnected groups of characters",
                    groups.len()
                ),
                affected_elements: groups.into_iter().flatten().cloned().collect(),
            });
        }

        let critical = critical_nodes_of(graph, index, self.config.critical_degree);
        if !critical.is_empty() {
            issues.push(StructuralIssue {
                kind: StructuralIssueType::SinglePointFailure,
                severity: Severity::Medium,
                description: "Some characters are critical: removing one may fragment the network"
                    .to_string(),
                affected_elements: critical,
            });
        }
        issues
    }

    fn isolated_characters(
        &self,
        graph: &NarrativeGraph,
        index: &GraphIndex<'_>,
    ) -> IsolatedCharacters {
        let mut characters = Vec::new();
        for character in graph.characters() {
            let rels = index.degree(&character.id);
            let conflicts = index.conflict_count(&character.id);
            let Some(isolation_type) = classify_isolation(rels, conflicts) else {
                continue;
            };
            let suggested_connections = match isolation_type {
                IsolationType::ConflictIsolated => {
                    self.suggest_conflict_involvement(graph, index, &character.id)
                }
                _ => self.suggest_connections(graph, index, &character.id),
            };
            characters.push(IsolatedCharacterIssue {
                character_name: character.name.clone(),
                character_id: character.id.clone(),
                isolation_type,
                suggested_connections,
            });
        }
        IsolatedCharacters {
            total_isolated: characters.len(),
            characters,
        }
    }

    /// Up to three characters not yet related to `id`: co-conflict members first,
    /// then the best-connected.
    fn suggest_connections(
        &self,
        graph: &NarrativeGraph,
        index: &GraphIndex<'_>,
        id: &CharacterId,
    ) -> Vec<String> {
        let neighbors = index.neighbors(id);
        let co_involved: BTreeSet<&CharacterId> = index
            .conflicts
            .get(id)
            .into_iter()
            .flatten()
            .flat_map(|c| c.involved_characters.iter())
            .collect();

        let mut candidates: Vec<_> = graph
            .characters()
            .filter(|c| &c.id != id && !neighbors.contains(&c.id))
            .collect();
        candidates.sort_by_key(|c| {
            (
                !co_involved.contains(&c.id),
                std::cmp::Reverse(index.degree(&c.id)),
                c.name.clone(),
            )
        });
        candidates
            .into_iter()
            .take(3)
            .map(|c| connection_suggestion(&c.name))
            .collect()
    }

    /// Up to two unresolved conflicts, preferring those a related character is already in.
    fn suggest_conflict_involvement(
        &self,
        graph: &NarrativeGraph,
        index: &GraphIndex<'_>,
        id: &CharacterId,
    ) -> Vec<String> {
        let neighbors = index.neighbors(id);
        let mut open: Vec<&Conflict> = graph.conflicts().filter(|c| !c.is_resolved()).collect();
        open.sort_by_key(|c| !c.involved_characters.iter().any(|m| neighbors.contains(m)));

        let suggestions: Vec<String> = open
            .into_iter()
            .take(2)
            .map(|c| involvement_suggestion(&c.name))
            .collect();
        if suggestions.is_empty() {
            return vec!["Introduce a conflict that tests this character's relationships".to_string()];
        }
        suggestions
    }

    fn abandoned_conflicts(&self, graph: &NarrativeGraph, now: DateTime<Utc>) -> AbandonedConflicts {
        let mut conflicts = Vec::new();
        for conflict in graph.conflicts() {
            let days = days_inactive(conflict, now);
            let mut issue_types = Vec::new();
            if days > self.config.abandoned_after_days {
                issue_types.push(AbandonedReason::StuckInPhase);
            }
            if conflict.strength < self.config.weak_involvement_below {
                issue_types.push(AbandonedReason::WeakInvolvement);
            }
            if issue_types.is_empty() {
                continue;
            }
            conflicts.push(AbandonedConflictIssue {
                conflict_name: conflict.name.clone(),
                conflict_id: conflict.id.clone(),
                issue_types,
                days_inactive: days,
                suggested_actions: conflict_actions(conflict),
            });
        }
        AbandonedConflicts {
            total_abandoned: conflicts.len(),
            conflicts,
        }
    }

    fn overloaded_characters(
        &self,
        graph: &NarrativeGraph,
        index: &GraphIndex<'_>,
    ) -> OverloadedCharacters {
        let threshold = self.config.overload_threshold;
        let mut characters = Vec::new();
        for character in graph.characters() {
            let rels = index.degree(&character.id);
            let conflict_load = 2 * index.conflict_count(&character.id);
            let load = rels + conflict_load;
            if load <= threshold {
                continue;
            }
            let overload_type = if rels > threshold {
                OverloadType::TooManyRelationships
            } else if conflict_load > threshold {
                OverloadType::TooManyConflicts
            } else {
                OverloadType::CentralBottleneck
            };
            characters.push(OverloadedCharacterIssue {
                character_name: character.name.clone(),
                character_id: character.id.clone(),
                overload_type,
                current_load: load,
                recommended_load: self.config.target_load,
                suggested_distribution: load_distribution(overload_type),
            });
        }
        OverloadedCharacters {
            total_overloaded: characters.len(),
            characters,
        }
    }

    fn weak_connections(&self, graph: &NarrativeGraph, index: &GraphIndex<'_>) -> WeakConnections {
        let below = self.config.weak_connection_below;
        let mut connections = Vec::new();

        for rel in index.valid_relationships.iter().filter(|r| r.strength < below) {
            connections.push(WeakConnectionIssue {
                connection_type: ConnectionType::Relationship,
                element_id: rel.id.to_string(),
                weakness: "Weak relationship strength".to_string(),
                strength_score: rel.strength,
                improvement_suggestions: vec![
                    "Add more scenes where the two characters interact".to_string(),
                    "Develop their shared backstory".to_string(),
                    "Create a conflict that brings them together".to_string(),
                ],
            });
        }
        for conflict in graph.conflicts().filter(|c| c.strength < below) {
            connections.push(WeakConnectionIssue {
                connection_type: ConnectionType::ConflictInvolvement,
                element_id: conflict.id.to_string(),
                weakness: "Weak involvement in the conflict".to_string(),
                strength_score: conflict.strength,
                improvement_suggestions: vec![
                    "Raise the stakes of the conflict".to_string(),
                    "Add significant turning points".to_string(),
                    "Tie the conflict to the characters' core motivations".to_string(),
                ],
            });
        }
        WeakConnections {
            total_weak: connections.len(),
            connections,
        }
    }

    fn redundancies(&self, graph: &NarrativeGraph, index: &GraphIndex<'_>) -> Redundancies {
        let mut items = Vec::new();

        for (a, b) in duplicate_relationship_pairs(&index.valid_relationships) {
            items.push(RedundancyIssue {
                redundancy_type: RedundancyType::DuplicateRelationships,
                affected_elements: vec![a.to_string(), b.to_string()],
                redundancy_score: 0.8,
                consolidation_suggestion:
                    "Merge the duplicate relationships into one stronger relationship".to_string(),
            });
        }
        for group in similar_conflict_groups(graph) {
            items.push(RedundancyIssue {
                redundancy_type: RedundancyType::SimilarConflicts,
                affected_elements: group.iter().map(|id| id.to_string()).collect(),
                redundancy_score: 0.7,
                consolidation_suggestion:
                    "Merge the similar conflicts into a single, more complex conflict".to_string(),
            });
        }
        Redundancies {
            total_redundant: items.len(),
            items,
        }
    }
}

/// Every pair of relationships with the same type and endpoints, in either direction.
fn duplicate_relationship_pairs<'a>(
    relationships: &[&'a Relationship],
) -> Vec<(&'a RelationshipId, &'a RelationshipId)> {
    let mut pairs = Vec::new();
    for (i, a) in relationships.iter().enumerate() {
        for b in &relationships[i + 1..] {
            if relationships_duplicate(a, b) {
                pairs.push((&a.id, &b.id));
            }
        }
    }
    pairs
}

/// Groups (size ≥ 2) of conflicts linked by similarity, closed transitively.
fn similar_conflict_groups(graph: &NarrativeGraph) -> Vec<Vec<ConflictId>> {
    let conflicts: Vec<&Conflict> = graph.conflicts().collect();
    let mut assigned = vec![false; conflicts.len()];
    let mut groups = Vec::new();

    for seed in 0..conflicts.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut group = vec![seed];
        let mut frontier = vec![seed];
        while let Some(current) = frontier.pop() {
            for other in 0..conflicts.len() {
                if !assigned[other] && conflicts_similar(conflicts[current], conflicts[other]) {
                    assigned[other] = true;
                    group.push(other);
                    frontier.push(other);
                }
            }
        }
        if group.len() > 1 {
            group.sort_unstable();
            groups.push(group.into_iter().map(|i| conflicts[i].id.clone()).collect());
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Character, ConflictScope, ConflictSubject, RelationshipType};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn graph_with(ids: &[&str]) -> NarrativeGraph {
        let mut graph = NarrativeGraph::new();
        for id in ids {
            graph.add_character(Character::new(*id, id.to_uppercase())).unwrap();
        }
        graph
    }

    fn rel(graph: &mut NarrativeGraph, id: &str, a: &str, b: &str, strength: f64) {
        graph
            .add_relationship(Relationship::new(id, a, b, RelationshipType::Friendship, strength))
            .unwrap();
    }

    // -- Pure function tests --

    #[test]
    fn test_classify_isolation_precedence() {
        assert_eq!(classify_isolation(0, 0), Some(IsolationType::CompletelyIsolated));
        assert_eq!(classify_isolation(0, 2), Some(IsolationType::WeaklyConnected));
        assert_eq!(classify_isolation(1, 0), Some(IsolationType::WeaklyConnected));
        assert_eq!(classify_isolation(2, 0), Some(IsolationType::ConflictIsolated));
        assert_eq!(classify_isolation(1, 1), None);
    }

    #[test]
    fn test_health_score_weights_and_floor() {
        assert_eq!(health_score(&IssueCounts::default()), 100);
        let counts = IssueCounts {
            structural: 1,
            isolated: 1,
            abandoned: 1,
            overloaded: 1,
            weak: 1,
            redundant: 1,
        };
        assert_eq!(health_score(&counts), 100 - 15 - 10 - 8 - 12 - 5 - 7);
        let many = IssueCounts {
            weak: 50,
            ..IssueCounts::default()
        };
        assert_eq!(health_score(&many), 0);
    }

    #[test]
    fn test_criticality_tiers() {
        assert_eq!(criticality_for(100), CriticalityLevel::Healthy);
        assert_eq!(criticality_for(85), CriticalityLevel::Healthy);
        assert_eq!(criticality_for(84), CriticalityLevel::MinorIssues);
        assert_eq!(criticality_for(70), CriticalityLevel::MinorIssues);
        assert_eq!(criticality_for(69), CriticalityLevel::ModerateIssues);
        assert_eq!(criticality_for(50), CriticalityLevel::ModerateIssues);
        assert_eq!(criticality_for(30), CriticalityLevel::MajorIssues);
        assert_eq!(criticality_for(29), CriticalityLevel::Critical);
        assert_eq!(criticality_for(0), CriticalityLevel::Critical);
    }

    #[test]
    fn test_days_inactive_rounds_up_and_defaults() {
        let now = Utc::now();
        let quiet = Conflict::new("x", "X", vec![], 5.0);
        assert_eq!(days_inactive(&quiet, now), 365);

        let recent = quiet.clone().with_timestamp(now - Duration::hours(25));
        assert_eq!(days_inactive(&recent, now), 2);

        let future = Conflict::new("y", "Y", vec![], 5.0).with_timestamp(now + Duration::days(3));
        assert_eq!(days_inactive(&future, now), 3);
    }

    // -- Analyses --

    #[test]
    fn test_components_are_iterative_and_undirected() {
        let mut graph = graph_with(&["a", "b", "c", "d", "e"]);
        rel(&mut graph, "r1", "b", "a", 5.0);
        rel(&mut graph, "r2", "c", "b", 5.0);
        rel(&mut graph, "r3", "d", "e", 5.0);

        let components = connected_components(&graph);
        let expected: Vec<Vec<CharacterId>> = vec![
            vec!["a".into(), "b".into(), "c".into()],
            vec!["d".into(), "e".into()],
        ];
        assert_eq!(components, expected);

        let report = DiagnosticsEngine::default().run_all_diagnostics(&graph);
        assert_eq!(report.structural_issues.len(), 1);
        assert_eq!(
            report.structural_issues[0].kind,
            StructuralIssueType::DisconnectedComponents
        );
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let ids: Vec<String> = (0..5_000).map(|i| format!("c{i:05}")).collect();
        let mut graph = NarrativeGraph::new();
        for id in &ids {
            graph.add_character(Character::new(id.as_str(), id.as_str())).unwrap();
        }
        for pair in ids.windows(2) {
            let id = format!("{}-{}", pair[0], pair[1]);
            rel(&mut graph, &id, &pair[0], &pair[1], 5.0);
        }
        assert_eq!(connected_components(&graph).len(), 1);
    }

    #[test]
    fn test_critical_nodes_by_degree() {
        let mut graph = graph_with(&["hub", "a", "b", "c"]);
        rel(&mut graph, "r1", "hub", "a", 5.0);
        rel(&mut graph, "r2", "hub", "b", 5.0);
        assert!(critical_nodes(&graph, 3).is_empty());
        rel(&mut graph, "r3", "c", "hub", 5.0);
        assert_eq!(critical_nodes(&graph, 3), vec![CharacterId::new("hub")]);
    }

    #[test]
    fn test_overload_counts_conflicts_twice() {
        let mut graph = graph_with(&["hero", "a", "b", "c"]);
        rel(&mut graph, "r1", "hero", "a", 5.0);
        for i in 0..4 {
            graph
                .add_conflict(Conflict::new(
                    format!("x{i}").as_str(),
                    format!("Conflict {i}"),
                    vec!["hero".into(), "b".into()],
                    6.0,
                ))
                .unwrap();
        }
        let report = DiagnosticsEngine::default().run_all_diagnostics(&graph);
        let overloaded = &report.overloaded_characters.characters;
        assert_eq!(overloaded.len(), 1);
        assert_eq!(overloaded[0].character_id, CharacterId::new("hero"));
        assert_eq!(overloaded[0].current_load, 9);
        assert_eq!(overloaded[0].recommended_load, 6);
        assert_eq!(overloaded[0].overload_type, OverloadType::CentralBottleneck);
    }

    #[test]
    fn test_similar_conflicts_group_transitively() {
        let mut graph = graph_with(&["a", "b", "c", "d"]);
        let power = |id: &str, members: &[&str]| {
            Conflict::new(id, id, members.iter().map(|m| CharacterId::new(*m)).collect(), 6.0)
                .with_subject(ConflictSubject::Power, ConflictScope::Personal)
        };
        graph.add_conflict(power("x1", &["a", "b"])).unwrap();
        graph.add_conflict(power("x2", &["b", "c"])).unwrap();
        graph.add_conflict(power("x3", &["c", "d"])).unwrap();
        graph
            .add_conflict(
                Conflict::new("x4", "x4", vec!["a".into()], 6.0)
                    .with_subject(ConflictSubject::Honor, ConflictScope::Personal),
            )
            .unwrap();

        let groups = similar_conflict_groups(&graph);
        assert_eq!(
            groups,
            vec![vec![ConflictId::new("x1"), ConflictId::new("x2"), ConflictId::new("x3")]]
        );
    }

    #[test]
    fn test_dangling_edges_are_skipped() {
        let json = r#"{
            "characters": {
                "a": { "id": "a", "name": "A" },
                "b": { "id": "b", "name": "B" }
            },
            "relationships": {
                "r1": { "id": "r1", "source": "a", "target": "b", "type": "family", "strength": 5.0 },
                "r2": { "id": "r2", "source": "a", "target": "ghost", "type": "family", "strength": 1.0 }
            }
        }"#;
        let graph = NarrativeGraph::from_json(json).unwrap();
        let report = DiagnosticsEngine::default().run_all_diagnostics(&graph);

        assert_eq!(report.skipped_references.len(), 1);
        assert_eq!(report.weak_connections.total_weak, 0);
        assert_eq!(report.components.len(), 1);
    }

    #[test]
    fn test_conflict_isolated_gets_involvement_suggestions() {
        let mut graph = graph_with(&["a", "b", "c", "d"]);
        rel(&mut graph, "r1", "a", "b", 5.0);
        rel(&mut graph, "r2", "a", "c", 5.0);
        graph
            .add_conflict(Conflict::new("x", "Succession", vec!["b".into(), "d".into()], 6.0))
            .unwrap();

        let report = DiagnosticsEngine::default().run_all_diagnostics(&graph);
        let a = report
            .isolated_characters
            .characters
            .iter()
            .find(|c| c.character_id == CharacterId::new("a"))
            .unwrap();
        assert_eq!(a.isolation_type, IsolationType::ConflictIsolated);
        assert_eq!(a.suggested_connections, vec!["Involve in conflict: Succession"]);
    }

    #[test]
    fn test_empty_graph_is_healthy() {
        let report = DiagnosticsEngine::default().run_all_diagnostics(&NarrativeGraph::new());
        assert_eq!(report.overall_health_score, 100);
        assert_eq!(report.criticality_level, CriticalityLevel::Healthy);
        assert!(report.components.is_empty());
    }
}
