//! Test data builders for narrative graphs.
//!
//! Characters are addressed by id; the display name is the id uppercased.

use chrono::{DateTime, Duration, Utc};
use seven_stations::models::{
    Character, Conflict, ConflictPhase, ConflictScope, ConflictSubject, NarrativeGraph,
    Relationship, RelationshipType,
};

/// Fluent builder for a [`NarrativeGraph`].
pub struct GraphBuilder {
    graph: NarrativeGraph,
    now: DateTime<Utc>,
    next_rel: usize,
}

impl GraphBuilder {
    /// New builder; `now` anchors `active_days_ago`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            graph: NarrativeGraph::new(),
            now,
            next_rel: 0,
        }
    }

    pub fn characters(mut self, ids: &[&str]) -> Self {
        for id in ids {
            self.graph
                .add_character(Character::new(*id, id.to_uppercase()))
                .expect("duplicate character in builder");
        }
        self
    }

    pub fn relationship(self, a: &str, b: &str, strength: f64) -> Self {
        self.typed_relationship(a, b, RelationshipType::Friendship, strength)
    }

    pub fn typed_relationship(mut self, a: &str, b: &str, kind: RelationshipType, strength: f64) -> Self {
        self.next_rel += 1;
        let rel = Relationship::new(format!("rel-{}", self.next_rel), a, b, kind, strength)
            .with_timestamp(self.now);
        self.graph.add_relationship(rel).expect("invalid relationship in builder");
        self
    }

    /// Conflict last active `days_ago` days before `now`.
    pub fn conflict(mut self, id: &str, involved: &[&str], strength: f64, days_ago: i64) -> Self {
        let conflict = Conflict::new(id, id.to_uppercase(), involved.iter().map(|c| (*c).into()).collect(), strength)
            .with_timestamp(self.now - Duration::days(days_ago));
        self.graph.add_conflict(conflict).expect("invalid conflict in builder");
        self
    }

    /// Conflict with an explicit subject, scope and phase, active now.
    pub fn classified_conflict(
        mut self,
        id: &str,
        involved: &[&str],
        subject: ConflictSubject,
        scope: ConflictScope,
        phase: ConflictPhase,
    ) -> Self {
        let conflict = Conflict::new(id, id.to_uppercase(), involved.iter().map(|c| (*c).into()).collect(), 6.0)
            .with_subject(subject, scope)
            .with_phase(phase)
            .with_timestamp(self.now);
        self.graph.add_conflict(conflict).expect("invalid conflict in builder");
        self
    }

    pub fn build(self) -> NarrativeGraph {
        self.graph
    }
}
