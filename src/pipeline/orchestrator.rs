//! Sequential pipeline over the registered stations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use super::stage::{Stage, StageInput, StageOptions, StageOutput, StageRunner};
use super::stations::{stage_registry, StageDeps, StageKind};
use crate::client::{CancelToken, ModelClient};
use crate::config::{ComplianceMode, StationsConfig, UncertaintyMode};
use crate::models::{NarrativeGraph, SharedGraph};
use crate::services::compliance::{ComplianceChecker, ModelComplianceChecker, RuleBasedComplianceChecker};
use crate::services::uncertainty::{
    HeuristicUncertaintyEstimator, SamplingUncertaintyEstimator, UncertaintyEstimator,
};
use crate::services::{DiagnosticsEngine, DiagnosticsReport};

/// Which stations to run and how.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub start_at: u8,
    pub end_at: u8,
    pub skip: BTreeSet<u8>,
    pub stage_options: StageOptions,
    pub chunks: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_at: 1,
            end_at: 7,
            skip: BTreeSet::new(),
            stage_options: StageOptions::default(),
            chunks: Vec::new(),
        }
    }
}

impl RunOptions {
    pub fn includes(&self, number: u8) -> bool {
        number >= self.start_at && number <= self.end_at && !self.skip.contains(&number)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub success: bool,
    pub stages: Vec<StageOutput>,
    pub diagnostics: Option<DiagnosticsReport>,
    pub stages_completed: usize,
    pub stages_failed: usize,
    /// `scoreMatrix.overall` from the final station, when it ran.
    pub overall_score: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_execution_ms: u64,
}

impl PipelineReport {
    pub fn stage(&self, number: u8) -> Option<&StageOutput> {
        self.stages.iter().find(|s| s.metadata.stage_number == number)
    }
}

pub struct Pipeline {
    runner: StageRunner,
    stages: Vec<Arc<dyn Stage>>,
    graph: SharedGraph,
    diagnostics: DiagnosticsEngine,
    stage_timeout: Option<Duration>,
    /// Held for a whole run; runs on one pipeline never share the graph.
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        runner: StageRunner,
        stages: Vec<Arc<dyn Stage>>,
        graph: SharedGraph,
        diagnostics: DiagnosticsEngine,
    ) -> Self {
        Self {
            runner,
            stages,
            graph,
            diagnostics,
            stage_timeout: None,
            run_lock: Mutex::new(()),
        }
    }

    /// The full seven-station pipeline, wired from configuration.
    pub fn from_config(client: Arc<ModelClient>, config: &StationsConfig) -> Self {
        let checker: Arc<dyn ComplianceChecker> = match config.pipeline.compliance {
            ComplianceMode::Rules => Arc::new(RuleBasedComplianceChecker::new()),
            ComplianceMode::Model => Arc::new(ModelComplianceChecker::new(client.clone())),
        };
        let estimator: Arc<dyn UncertaintyEstimator> = match config.pipeline.uncertainty {
            UncertaintyMode::Heuristic => Arc::new(HeuristicUncertaintyEstimator::new()),
            UncertaintyMode::Sampling => Arc::new(SamplingUncertaintyEstimator::new(
                client.clone(),
                config.pipeline.uncertainty_samples,
            )),
        };

        let graph = SharedGraph::default();
        let diagnostics = DiagnosticsEngine::new(config.diagnostics.clone());
        let deps = StageDeps {
            client,
            graph: graph.clone(),
            diagnostics: diagnostics.clone(),
            max_prompt_chars: config.pipeline.max_prompt_chars,
        };
        let stages = stage_registry()
            .iter()
            .map(|(_, factory)| factory(deps.clone()))
            .collect();

        Self::new(StageRunner::new(checker, estimator), stages, graph, diagnostics)
            .with_stage_timeout(config.pipeline.stage_timeout())
    }

    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// Run the selected stations in order. Failed stations never stop the run.
    ///
    /// Every run starts from an empty graph; [`graph`](Self::graph) holds the
    /// last run's graph until the next run begins.
    pub async fn run(&self, text: &str, options: &RunOptions) -> PipelineReport {
        let _run = self.run_lock.lock().await;
        *self.graph.write().await = NarrativeGraph::new();

        let started = Instant::now();
        let started_at = Utc::now();
        let final_station = StageKind::Finalization.number();
        info!(
            text_len = text.len(),
            start_at = options.start_at,
            end_at = options.end_at,
            "Pipeline started"
        );

        let mut previous: BTreeMap<u8, Value> = BTreeMap::new();
        let mut outputs = Vec::new();
        let mut diagnostics = None;

        for stage in self.stages.iter().filter(|s| options.includes(s.number())) {
            if stage.number() == final_station && diagnostics.is_none() {
                diagnostics = Some(self.diagnose().await);
            }

            let input = StageInput::new(text)
                .with_options(options.stage_options.clone())
                .with_previous(previous.clone())
                .with_chunks(options.chunks.clone());
            let output = self.run_stage(stage.as_ref(), input).await;
            if let Some(result) = &output.result {
                previous.insert(stage.number(), result.clone());
            }
            outputs.push(output);
        }

        let diagnostics = match diagnostics {
            Some(report) => report,
            None => self.diagnose().await,
        };
        let completed = outputs.iter().filter(|o| o.succeeded()).count();
        let failed = outputs.len() - completed;
        let overall_score = previous
            .get(&final_station)
            .and_then(|r| r.pointer("/scoreMatrix/overall"))
            .and_then(Value::as_f64);

        let report = PipelineReport {
            success: failed == 0,
            stages: outputs,
            diagnostics: Some(diagnostics),
            stages_completed: completed,
            stages_failed: failed,
            overall_score,
            started_at,
            finished_at: Utc::now(),
            total_execution_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            completed = report.stages_completed,
            failed = report.stages_failed,
            elapsed_ms = report.total_execution_ms,
            "Pipeline finished"
        );
        report
    }

    async fn run_stage(&self, stage: &dyn Stage, input: StageInput) -> StageOutput {
        let Some(limit) = self.stage_timeout else {
            return self.runner.run(stage, input).await;
        };

        let cancel = CancelToken::new();
        let input = input.with_cancel(cancel.clone());
        let started = (Instant::now(), Utc::now());
        match tokio::time::timeout(limit, self.runner.run(stage, input.clone())).await {
            Ok(output) => output,
            Err(_) => {
                cancel.cancel();
                warn!(stage = stage.name(), ?limit, "Stage deadline exceeded");
                StageRunner::failed_output(
                    stage,
                    &input,
                    started,
                    format!("stage deadline of {}s exceeded", limit.as_secs_f64()),
                )
            }
        }
    }

    async fn diagnose(&self) -> DiagnosticsReport {
        let snapshot = self.graph.snapshot().await;
        let report = self.diagnostics.run_all_diagnostics(&snapshot);
        info!(
            score = report.overall_health_score,
            level = report.criticality_level.as_str(),
            "Graph diagnostics complete"
        );
        report
    }
}
