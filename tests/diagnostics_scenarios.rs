//! End-to-end diagnostics over small hand-built graphs.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::GraphBuilder;
use pretty_assertions::assert_eq;
use serde_json::json;

use seven_stations::models::{
    CharacterId, ConflictPhase, ConflictScope, ConflictSubject, NarrativeGraph,
};
use seven_stations::services::diagnostics::{
    AbandonedReason, IsolationType, OverloadType, RedundancyType, StructuralIssueType,
};
use seven_stations::services::{CriticalityLevel, DiagnosticsEngine, DiagnosticsReport, Severity};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn ids(raw: &[&str]) -> Vec<CharacterId> {
    raw.iter().map(|id| CharacterId::from(*id)).collect()
}

fn run(graph: &NarrativeGraph) -> DiagnosticsReport {
    DiagnosticsEngine::default().run_at(graph, now())
}

fn isolation_of(report: &DiagnosticsReport, id: &str) -> Option<IsolationType> {
    report
        .isolated_characters
        .characters
        .iter()
        .find(|c| c.character_id.as_str() == id)
        .map(|c| c.isolation_type)
}

#[test]
fn test_pair_and_loner() {
    let graph = GraphBuilder::new(now())
        .characters(&["a", "b", "c"])
        .relationship("a", "b", 5.0)
        .build();

    let report = run(&graph);

    assert_eq!(report.components, vec![ids(&["a", "b"]), ids(&["c"])]);
    assert!(report.structural_issues.is_empty());
    assert_eq!(isolation_of(&report, "c"), Some(IsolationType::CompletelyIsolated));
    assert_eq!(isolation_of(&report, "a"), Some(IsolationType::WeaklyConnected));
    assert_eq!(report.isolated_characters.completely_isolated(), 1);
    assert_eq!(report.overall_health_score, 90);
    assert_eq!(report.criticality_level, CriticalityLevel::Healthy);
    assert_eq!(report.generated_at, now());

    let loner = report
        .isolated_characters
        .characters
        .iter()
        .find(|c| c.character_id.as_str() == "c")
        .unwrap();
    assert_eq!(loner.character_name, "C");
    assert_eq!(loner.suggested_connections, vec!["Connect with A", "Connect with B"]);
}

#[test]
fn test_stale_weak_conflict_on_the_loner() {
    let graph = GraphBuilder::new(now())
        .characters(&["a", "b", "c"])
        .relationship("a", "b", 5.0)
        .conflict("x", &["c"], 2.0, 40)
        .build();

    let report = run(&graph);

    // No relationships but one conflict: weakly connected, not penalised.
    assert_eq!(isolation_of(&report, "c"), Some(IsolationType::WeaklyConnected));
    assert_eq!(report.isolated_characters.completely_isolated(), 0);

    assert_eq!(report.abandoned_conflicts.total_abandoned, 1);
    let abandoned = &report.abandoned_conflicts.conflicts[0];
    assert_eq!(abandoned.conflict_id.as_str(), "x");
    assert_eq!(
        abandoned.issue_types,
        vec![AbandonedReason::StuckInPhase, AbandonedReason::WeakInvolvement]
    );
    assert_eq!(abandoned.days_inactive, 40);
    assert!(abandoned.suggested_actions[0].contains("emerging"));

    assert_eq!(report.weak_connections.total_weak, 1);
    // 100 - 8 (abandoned) - 5 (weak conflict)
    assert_eq!(report.overall_health_score, 87);
    assert_eq!(report.criticality_level, CriticalityLevel::Healthy);
}

#[test]
fn test_duplicate_relationship_in_either_direction() {
    let graph = GraphBuilder::new(now())
        .characters(&["a", "b"])
        .relationship("a", "b", 5.0)
        .relationship("b", "a", 6.0)
        .build();

    let report = run(&graph);

    assert_eq!(report.redundancies.total_redundant, 1);
    let item = &report.redundancies.items[0];
    assert_eq!(item.redundancy_type, RedundancyType::DuplicateRelationships);
    assert_eq!(item.affected_elements, vec!["rel-1", "rel-2"]);
    assert_eq!(report.overall_health_score, 93);
}

#[test]
fn test_different_types_are_not_duplicates() {
    use seven_stations::models::RelationshipType;

    let graph = GraphBuilder::new(now())
        .characters(&["a", "b"])
        .typed_relationship("a", "b", RelationshipType::Family, 7.0)
        .typed_relationship("a", "b", RelationshipType::Antagonistic, 7.0)
        .build();

    assert_eq!(run(&graph).redundancies.total_redundant, 0);
}

#[test]
fn test_two_separate_groups_are_a_structural_issue() {
    let graph = GraphBuilder::new(now())
        .characters(&["a", "b", "c", "d"])
        .relationship("a", "b", 6.0)
        .relationship("c", "d", 6.0)
        .build();

    let report = run(&graph);

    assert_eq!(report.structural_issues.len(), 1);
    let issue = &report.structural_issues[0];
    assert_eq!(issue.kind, StructuralIssueType::DisconnectedComponents);
    assert_eq!(issue.severity, Severity::High);
    assert_eq!(issue.affected_elements, ids(&["a", "b", "c", "d"]));
    assert_eq!(report.overall_health_score, 85);
}

#[test]
fn test_hub_is_a_single_point_of_failure() {
    let graph = GraphBuilder::new(now())
        .characters(&["hub", "x", "y", "z"])
        .relationship("hub", "x", 6.0)
        .relationship("hub", "y", 6.0)
        .relationship("hub", "z", 6.0)
        .build();

    let report = run(&graph);

    assert_eq!(report.components, vec![ids(&["hub", "x", "y", "z"])]);
    assert_eq!(report.structural_issues.len(), 1);
    assert_eq!(report.structural_issues[0].kind, StructuralIssueType::SinglePointFailure);
    assert_eq!(report.structural_issues[0].affected_elements, ids(&["hub"]));
    assert_eq!(isolation_of(&report, "hub"), Some(IsolationType::ConflictIsolated));
}

#[test]
fn test_busy_character_is_a_bottleneck() {
    let graph = GraphBuilder::new(now())
        .characters(&["m", "a", "b", "c", "d", "e"])
        .relationship("m", "a", 6.0)
        .relationship("m", "b", 6.0)
        .relationship("m", "c", 6.0)
        .relationship("m", "d", 6.0)
        .relationship("m", "e", 6.0)
        .conflict("feud", &["m", "a"], 6.0, 1)
        .conflict("debt", &["m", "b"], 6.0, 1)
        .build();

    let report = run(&graph);

    assert_eq!(report.overloaded_characters.total_overloaded, 1);
    let busy = &report.overloaded_characters.characters[0];
    assert_eq!(busy.character_id.as_str(), "m");
    assert_eq!(busy.current_load, 9);
    assert_eq!(busy.recommended_load, 6);
    assert_eq!(busy.overload_type, OverloadType::CentralBottleneck);
}

#[test]
fn test_similar_conflicts_are_one_group() {
    let graph = GraphBuilder::new(now())
        .characters(&["a", "b", "c", "d"])
        .relationship("a", "b", 6.0)
        .relationship("c", "d", 6.0)
        .relationship("b", "c", 6.0)
        .classified_conflict("x", &["a", "b"], ConflictSubject::Power, ConflictScope::Group, ConflictPhase::Peak)
        .classified_conflict("y", &["b", "c"], ConflictSubject::Power, ConflictScope::Group, ConflictPhase::Peak)
        .classified_conflict("z", &["c", "d"], ConflictSubject::Power, ConflictScope::Group, ConflictPhase::Peak)
        .classified_conflict("w", &["a", "d"], ConflictSubject::Honor, ConflictScope::Group, ConflictPhase::Peak)
        .build();

    let report = run(&graph);

    assert_eq!(report.redundancies.total_redundant, 1);
    assert_eq!(
        report.redundancies.items[0].redundancy_type,
        RedundancyType::SimilarConflicts
    );
    assert_eq!(report.redundancies.items[0].affected_elements, vec!["x", "y", "z"]);
}

#[test]
fn test_dangling_references_are_skipped_not_fatal() {
    let graph = NarrativeGraph::from_json(
        &json!({
            "characters": {
                "a": { "id": "a", "name": "A" },
                "b": { "id": "b", "name": "B" }
            },
            "relationships": {
                "r1": { "id": "r1", "source": "a", "target": "b", "type": "family", "strength": 7.0 },
                "r2": { "id": "r2", "source": "a", "target": "ghost", "type": "friendship", "strength": 1.0 }
            },
            "conflicts": {
                "c1": {
                    "id": "c1", "name": "Inheritance", "involvedCharacters": ["a", "phantom"],
                    "subject": "resources", "scope": "personal", "phase": "escalating",
                    "strength": 6.0, "timestamps": ["2026-02-28T12:00:00Z"]
                }
            }
        })
        .to_string(),
    )
    .unwrap();

    let report = run(&graph);

    assert_eq!(report.skipped_references.len(), 2);
    assert_eq!(report.components, vec![ids(&["a", "b"])]);
    // The dangling weak relationship is not reported as a weak connection.
    assert_eq!(report.weak_connections.total_weak, 0);
    assert_eq!(report.abandoned_conflicts.total_abandoned, 0);
}

#[test]
fn test_report_json_shape() {
    let graph = GraphBuilder::new(now())
        .characters(&["a", "b", "c"])
        .relationship("a", "b", 5.0)
        .build();
    let report = run(&graph);

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["overallHealthScore"], 90);
    assert_eq!(value["criticalityLevel"], "healthy");
    assert_eq!(value["components"], json!([["a", "b"], ["c"]]));
    assert_eq!(
        value["isolatedCharacters"]["characters"][2]["isolationType"],
        "completely_isolated"
    );

    let back: DiagnosticsReport = serde_json::from_value(value).unwrap();
    assert_eq!(back, report);
}

#[test]
fn test_empty_graph() {
    let report = run(&NarrativeGraph::new());
    assert_eq!(report.overall_health_score, 100);
    assert!(report.components.is_empty());
    assert_eq!(report.criticality_level, CriticalityLevel::Healthy);
}
