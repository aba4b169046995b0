//! Property tests for the diagnostics engine over random graphs.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use seven_stations::models::{
    Character, CharacterId, Conflict, NarrativeGraph, Relationship, RelationshipType,
};
use seven_stations::services::diagnostics::{criticality_for, IsolationType};
use seven_stations::services::DiagnosticsEngine;

const MAX_CHARACTERS: usize = 12;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn char_id(i: usize) -> CharacterId {
    CharacterId::new(format!("c{i}"))
}

/// Random edges as (source, target, strength); indices are taken modulo the
/// character count.
type Edges = Vec<(usize, usize, u8)>;
/// Random conflicts as (members, strength, days since last activity).
type Conflicts = Vec<(Vec<usize>, u8, i64)>;

fn build_graph(n: usize, edges: &Edges, conflicts: &Conflicts) -> NarrativeGraph {
    let mut graph = NarrativeGraph::new();
    for i in 0..n {
        graph
            .add_character(Character::new(char_id(i), format!("Character {i}")))
            .unwrap();
    }
    for (k, (a, b, strength)) in edges.iter().enumerate() {
        let (a, b) = (a % n, b % n);
        if a == b {
            continue;
        }
        let rel = Relationship::new(
            format!("r{k}"),
            char_id(a),
            char_id(b),
            RelationshipType::Friendship,
            f64::from(*strength),
        )
        .with_timestamp(now());
        graph.add_relationship(rel).unwrap();
    }
    for (k, (members, strength, days)) in conflicts.iter().enumerate() {
        let involved = members.iter().map(|m| char_id(m % n)).collect();
        let conflict = Conflict::new(format!("x{k}"), format!("Conflict {k}"), involved, f64::from(*strength))
            .with_timestamp(now() - Duration::days(*days));
        graph.add_conflict(conflict).unwrap();
    }
    graph
}

fn graph_strategy() -> impl Strategy<Value = (usize, Edges, Conflicts)> {
    (
        1..=MAX_CHARACTERS,
        prop::collection::vec((0..MAX_CHARACTERS, 0..MAX_CHARACTERS, 0u8..=10), 0..20),
        prop::collection::vec(
            (prop::collection::vec(0..MAX_CHARACTERS, 1..4), 0u8..=10, 0i64..90),
            0..5,
        ),
    )
}

proptest! {
    #[test]
    fn components_partition_the_characters((n, edges, conflicts) in graph_strategy()) {
        let graph = build_graph(n, &edges, &conflicts);
        let report = DiagnosticsEngine::default().run_at(&graph, now());

        let mut seen = BTreeSet::new();
        for component in &report.components {
            prop_assert!(!component.is_empty());
            prop_assert!(component.windows(2).all(|w| w[0] < w[1]), "component not sorted");
            for id in component {
                prop_assert!(seen.insert(id.clone()), "{} in two components", id);
            }
        }
        prop_assert_eq!(seen.len(), n);

        for rel in graph.relationships() {
            let holder = report.components.iter().find(|c| c.contains(&rel.source)).unwrap();
            prop_assert!(holder.contains(&rel.target), "edge {} crosses components", rel.id);
        }
    }

    #[test]
    fn completely_isolated_means_no_ties((n, edges, conflicts) in graph_strategy()) {
        let graph = build_graph(n, &edges, &conflicts);
        let report = DiagnosticsEngine::default().run_at(&graph, now());

        let expected: BTreeSet<CharacterId> = graph
            .characters()
            .filter(|c| graph.relationships_of(&c.id).next().is_none())
            .filter(|c| graph.conflicts_of(&c.id).next().is_none())
            .map(|c| c.id.clone())
            .collect();
        let flagged: BTreeSet<CharacterId> = report
            .isolated_characters
            .characters
            .iter()
            .filter(|c| c.isolation_type == IsolationType::CompletelyIsolated)
            .map(|c| c.character_id.clone())
            .collect();
        prop_assert_eq!(flagged, expected);
        prop_assert_eq!(report.isolated_characters.total_isolated, report.isolated_characters.characters.len());
    }

    #[test]
    fn score_is_bounded_and_tiered((n, edges, conflicts) in graph_strategy()) {
        let graph = build_graph(n, &edges, &conflicts);
        let report = DiagnosticsEngine::default().run_at(&graph, now());

        prop_assert!(report.overall_health_score <= 100);
        prop_assert_eq!(report.criticality_level, criticality_for(report.overall_health_score));
    }

    #[test]
    fn weak_parallel_edge_never_raises_the_score(
        (n, edges, conflicts) in graph_strategy(),
        pick in 0usize..64,
    ) {
        let mut graph = build_graph(n, &edges, &conflicts);
        let engine = DiagnosticsEngine::default();
        let before = engine.run_at(&graph, now()).overall_health_score;

        let pairs: Vec<(CharacterId, CharacterId)> = graph
            .relationships()
            .map(|r| (r.source.clone(), r.target.clone()))
            .collect();
        prop_assume!(!pairs.is_empty());
        let (a, b) = pairs[pick % pairs.len()].clone();
        graph
            .add_relationship(Relationship::new("weak-extra", a, b, RelationshipType::Other, 1.0))
            .unwrap();

        let after = engine.run_at(&graph, now()).overall_health_score;
        prop_assert!(after <= before, "score rose from {} to {}", before, after);
    }

    #[test]
    fn json_round_trip_preserves_the_report((n, edges, conflicts) in graph_strategy()) {
        let graph = build_graph(n, &edges, &conflicts);
        let restored = NarrativeGraph::from_json(&graph.to_json().unwrap()).unwrap();
        prop_assert_eq!(&restored, &graph);

        let engine = DiagnosticsEngine::default();
        prop_assert_eq!(engine.run_at(&restored, now()), engine.run_at(&graph, now()));
    }
}
