//! CLI handler for running the analysis pipeline.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cli::handlers::diagnose::print_report;
use crate::cli::output::{
    colored_status, output_json, print_header, print_hint, print_kv, print_md_table, print_table,
    DetailLevel, OutputMode,
};
use crate::client::ModelClient;
use crate::config::StationsConfig;
use crate::pipeline::{Pipeline, PipelineReport, RunOptions, StageOptions};

#[derive(Debug, Clone)]
pub struct AnalyzeArgs {
    pub input: PathBuf,
    pub start_at: u8,
    pub end_at: u8,
    pub skip: Vec<u8>,
    pub stage_timeout: Option<u64>,
    pub compliance: bool,
    pub uncertainty: bool,
    pub save_graph: Option<PathBuf>,
}

impl AnalyzeArgs {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            start_at: self.start_at,
            end_at: self.end_at,
            skip: self.skip.iter().copied().collect::<BTreeSet<_>>(),
            stage_options: StageOptions {
                enable_compliance: Some(self.compliance),
                enable_uncertainty: Some(self.uncertainty),
                ..Default::default()
            },
            chunks: Vec::new(),
        }
    }
}

pub async fn handle_analyze(
    args: &AnalyzeArgs,
    config: &StationsConfig,
    mode: OutputMode,
    detail: DetailLevel,
) -> Result<()> {
    if args.start_at > args.end_at {
        anyhow::bail!(
            "--start-at ({}) must not be after --end-at ({})",
            args.start_at,
            args.end_at
        );
    }
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    if text.trim().is_empty() {
        anyhow::bail!("{} is empty", args.input.display());
    }

    let client = ModelClient::from_env(config.client.clone())
        .map_err(|e| anyhow::anyhow!("Failed to create model client: {}", e))?;
    let mut pipeline = Pipeline::from_config(Arc::new(client), config);
    if let Some(secs) = args.stage_timeout {
        pipeline = pipeline.with_stage_timeout(Some(Duration::from_secs(secs)));
    }

    let report = pipeline.run(&text, &args.run_options()).await;

    if let Some(path) = &args.save_graph {
        let graph = pipeline.graph().snapshot().await;
        let json = graph
            .to_json()
            .map_err(|e| anyhow::anyhow!("Failed to serialize graph: {}", e))?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write graph to {}", path.display()))?;
        if mode == OutputMode::Human {
            print_hint(&format!("Graph saved to {}", path.display()));
        }
    }

    let graph = pipeline.graph().snapshot().await;
    print_pipeline(&report, mode, detail);
    if mode != OutputMode::Json {
        if let Some(diagnostics) = &report.diagnostics {
            print_report(diagnostics, &graph, mode, detail);
        }
    }

    if report.stages_completed == 0 && !report.stages.is_empty() {
        anyhow::bail!("every station failed");
    }
    Ok(())
}

fn print_pipeline(report: &PipelineReport, mode: OutputMode, detail: DetailLevel) {
    if mode == OutputMode::Json {
        output_json(report);
        return;
    }

    let rows: Vec<Vec<String>> = report
        .stages
        .iter()
        .map(|s| {
            let m = &s.metadata;
            let compliance = m
                .compliance
                .as_ref()
                .map(|c| {
                    if c.compliant {
                        "ok".to_string()
                    } else {
                        format!("{} violation(s)", c.violations.len())
                    }
                })
                .unwrap_or_else(|| "-".into());
            let confidence = m
                .uncertainty
                .as_ref()
                .map(|u| format!("{:.2}", u.overall_confidence))
                .unwrap_or_else(|| "-".into());
            vec![
                m.stage_number.to_string(),
                m.stage_name.clone(),
                match mode {
                    OutputMode::Human => colored_status(m.status).to_string(),
                    _ => format!("{:?}", m.status),
                },
                format!("{:.1}s", m.execution_time_ms as f64 / 1000.0),
                compliance,
                confidence,
                m.error.clone().unwrap_or_default(),
            ]
        })
        .collect();
    let headers = ["#", "Station", "Status", "Time", "Compliance", "Confidence", "Error"];

    if mode == OutputMode::Markdown {
        println!("## Pipeline run\n");
        println!(
            "{} completed, {} failed in {:.1}s\n",
            report.stages_completed,
            report.stages_failed,
            report.total_execution_ms as f64 / 1000.0
        );
        print_md_table(&headers, &rows);
        println!();
        return;
    }

    print_header("Pipeline run");
    print_kv(
        "Stations",
        &format!("{} completed, {} failed", report.stages_completed, report.stages_failed),
    );
    print_kv(
        "Elapsed",
        &format!("{:.1}s", report.total_execution_ms as f64 / 1000.0),
    );
    if let Some(score) = report.overall_score {
        print_kv("Overall score", &format!("{score:.1}/10"));
    }
    println!();
    print_table(&headers, rows);

    if detail == DetailLevel::Full {
        for stage in &report.stages {
            let Some(c) = &stage.metadata.compliance else {
                continue;
            };
            for violation in &c.violations {
                print_hint(&format!("  [{}] {}", stage.metadata.stage_number, violation));
            }
        }
    }
}
