//! CLI handler for graph diagnostics.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{
    colored_score, output_json, print_header, print_hint, print_kv, print_md_table, print_table,
    DetailLevel, OutputMode,
};
use crate::config::StationsConfig;
use crate::models::NarrativeGraph;
use crate::services::{DiagnosticsEngine, DiagnosticsReport};

/// snake_case label of a serde enum.
pub(crate) fn label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

pub fn handle_diagnose(
    path: &Path,
    config: &StationsConfig,
    mode: OutputMode,
    detail: DetailLevel,
) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read graph file {}", path.display()))?;
    let graph = NarrativeGraph::from_json(&json)
        .map_err(|e| anyhow::anyhow!("Invalid graph file {}: {}", path.display(), e))?;

    let report = DiagnosticsEngine::new(config.diagnostics.clone()).run_all_diagnostics(&graph);
    print_report(&report, &graph, mode, detail);
    Ok(())
}

/// Rows of every issue in the report: category, subject, detail, suggestions.
fn issue_rows(report: &DiagnosticsReport, graph: &NarrativeGraph) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for issue in &report.structural_issues {
        let names: Vec<String> = issue
            .affected_elements
            .iter()
            .map(|id| graph.character(id).map_or_else(|| id.to_string(), |c| c.name.clone()))
            .collect();
        rows.push(vec![
            format!("structural ({})", label(&issue.severity)),
            label(&issue.kind),
            issue.description.clone(),
            names.join(", "),
        ]);
    }
    for c in &report.isolated_characters.characters {
        rows.push(vec![
            "isolated".into(),
            c.character_name.clone(),
            label(&c.isolation_type),
            c.suggested_connections.join("; "),
        ]);
    }
    for c in &report.abandoned_conflicts.conflicts {
        let reasons: Vec<String> = c.issue_types.iter().map(label).collect();
        rows.push(vec![
            "abandoned".into(),
            c.conflict_name.clone(),
            format!("{} ({} days inactive)", reasons.join(", "), c.days_inactive),
            c.suggested_actions.join("; "),
        ]);
    }
    for c in &report.overloaded_characters.characters {
        rows.push(vec![
            "overloaded".into(),
            c.character_name.clone(),
            format!(
                "{} (load {} > target {})",
                label(&c.overload_type),
                c.current_load,
                c.recommended_load
            ),
            c.suggested_distribution.join("; "),
        ]);
    }
    for w in &report.weak_connections.connections {
        rows.push(vec![
            "weak".into(),
            w.element_id.clone(),
            format!("{} {:.1}: {}", label(&w.connection_type), w.strength_score, w.weakness),
            w.improvement_suggestions.join("; "),
        ]);
    }
    for r in &report.redundancies.items {
        rows.push(vec![
            "redundant".into(),
            r.affected_elements.join(", "),
            label(&r.redundancy_type),
            r.consolidation_suggestion.clone(),
        ]);
    }
    rows
}

pub fn print_report(
    report: &DiagnosticsReport,
    graph: &NarrativeGraph,
    mode: OutputMode,
    detail: DetailLevel,
) {
    if mode == OutputMode::Json {
        output_json(report);
        return;
    }

    let mut rows = issue_rows(report, graph);
    if detail != DetailLevel::Full {
        for row in &mut rows {
            row.pop();
        }
    }
    let headers: &[&str] = if detail == DetailLevel::Full {
        &["Category", "Subject", "Detail", "Suggestions"]
    } else {
        &["Category", "Subject", "Detail"]
    };

    if mode == OutputMode::Markdown {
        println!("## Narrative graph diagnostics\n");
        println!(
            "**Health:** {}/100 ({})\n",
            report.overall_health_score,
            report.criticality_level.as_str()
        );
        if detail != DetailLevel::Brief {
            print_md_table(headers, &rows);
        }
        return;
    }

    print_header("Narrative graph diagnostics");
    print_kv("Health", &colored_score(report.overall_health_score, report.criticality_level).to_string());
    print_kv("Components", &report.components.len().to_string());
    print_kv(
        "Characters",
        &format!(
            "{} ({} completely isolated)",
            graph.character_count(),
            report.isolated_characters.completely_isolated()
        ),
    );
    if detail == DetailLevel::Brief {
        return;
    }
    println!();
    print_table(headers, rows);
    if !report.skipped_references.is_empty() {
        print_hint(&format!(
            "{} reference(s) to missing characters were skipped.",
            report.skipped_references.len()
        ));
    }
}
