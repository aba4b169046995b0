//! Stage trait and the runner that wraps every stage with the shared
//! post-processors.
//!
//! A stage only produces a JSON result. The [`StageRunner`] resolves options,
//! runs compliance checking and uncertainty scoring over the result's text
//! fields, and always hands back a [`StageOutput`], failed or not.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::fields::{apply_patches, extract_text_fields, FieldPatch, TextField};
use crate::client::CancelToken;
use crate::services::compliance::ComplianceChecker;
use crate::services::uncertainty::{
    UncertaintyContext, UncertaintyEstimator, UncertaintySource, UncertaintyType, MAX_SOURCES,
};
use crate::utils::text::estimate_tokens;
use crate::StationsError;

// =============================================================================
// OPTIONS
// =============================================================================

/// Caller-supplied options. Unset fields take the stage defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOptions {
    pub enable_compliance: Option<bool>,
    pub enable_uncertainty: Option<bool>,
    pub enable_rag: Option<bool>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl StageOptions {
    pub fn resolve(&self, defaults: &ResolvedOptions) -> ResolvedOptions {
        ResolvedOptions {
            enable_compliance: self.enable_compliance.unwrap_or(defaults.enable_compliance),
            enable_uncertainty: self.enable_uncertainty.unwrap_or(defaults.enable_uncertainty),
            enable_rag: self.enable_rag.unwrap_or(defaults.enable_rag),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOptions {
    pub enable_compliance: bool,
    pub enable_uncertainty: bool,
    pub enable_rag: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        Self {
            enable_compliance: true,
            enable_uncertainty: true,
            enable_rag: false,
            temperature: 0.4,
            max_tokens: 4096,
        }
    }
}

// =============================================================================
// INPUT / OUTPUT
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct StageInput {
    pub text: String,
    pub options: StageOptions,
    /// Results of earlier stages keyed by stage number.
    pub previous_results: BTreeMap<u8, Value>,
    /// Retrieved chunks, used when retrieval augmentation is enabled.
    pub chunks: Vec<String>,
    pub cancel: CancelToken,
}

impl StageInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_options(mut self, options: StageOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_previous(mut self, previous: BTreeMap<u8, Value>) -> Self {
        self.previous_results = previous;
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<String>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn previous(&self, stage: u8) -> Option<&Value> {
        self.previous_results.get(&stage)
    }
}

/// Lifecycle of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Executing,
    Success,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub checked: bool,
    pub compliant: bool,
    /// `"{principle}: {description}"` per violation.
    pub violations: Vec<String>,
    pub improvement_score: f64,
}

impl ComplianceReport {
    fn failed(reason: &str) -> Self {
        Self {
            checked: false,
            compliant: false,
            violations: vec![format!("Check failed: {reason}")],
            improvement_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertaintyReport {
    pub quantified: bool,
    pub overall_confidence: f64,
    pub uncertainty_type: UncertaintyType,
    pub sources: Vec<UncertaintySource>,
}

impl UncertaintyReport {
    fn failed(reason: &str) -> Self {
        Self {
            quantified: false,
            overall_confidence: 0.5,
            uncertainty_type: UncertaintyType::Epistemic,
            sources: vec![UncertaintySource {
                aspect: "quantification".to_string(),
                reason: reason.to_string(),
                reducible: false,
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagInfo {
    pub was_chunked: bool,
    pub chunks_count: usize,
    pub retrieval_time_ms: u64,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetadata {
    pub stage_name: String,
    pub stage_number: u8,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub agents_used: Vec<String>,
    /// Rough estimate over the stage's input text.
    pub tokens_used: u32,
    pub options: ResolvedOptions,
    pub error: Option<String>,
    pub compliance: Option<ComplianceReport>,
    pub uncertainty: Option<UncertaintyReport>,
    pub rag_info: Option<RagInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// `None` when the stage failed.
    pub result: Option<Value>,
    pub metadata: StageMetadata,
}

impl StageOutput {
    pub fn succeeded(&self) -> bool {
        self.metadata.status == StageStatus::Success
    }
}

// =============================================================================
// STAGE TRAIT
// =============================================================================

/// One phase of the analysis pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn number(&self) -> u8;

    fn agents_used(&self) -> Vec<String> {
        Vec::new()
    }

    fn default_options(&self) -> ResolvedOptions {
        ResolvedOptions::default()
    }

    /// Stage-specific work. Errors are caught by the runner.
    async fn execute(
        &self,
        input: &StageInput,
        options: &ResolvedOptions,
    ) -> Result<Value, StationsError>;

    /// Fields the post-processors look at.
    fn text_fields(&self, result: &Value) -> Vec<TextField> {
        extract_text_fields(result)
    }
}

// =============================================================================
// RUNNER
// =============================================================================

/// Runs stages with compliance and uncertainty post-processing.
#[derive(Clone)]
pub struct StageRunner {
    checker: Arc<dyn ComplianceChecker>,
    estimator: Arc<dyn UncertaintyEstimator>,
}

impl StageRunner {
    pub fn new(checker: Arc<dyn ComplianceChecker>, estimator: Arc<dyn UncertaintyEstimator>) -> Self {
        Self { checker, estimator }
    }

    /// Run a stage to a terminal status. Never fails.
    pub async fn run(&self, stage: &dyn Stage, input: StageInput) -> StageOutput {
        let started = Instant::now();
        let started_at = Utc::now();
        let options = input.options.resolve(&stage.default_options());
        let mut status = StageStatus::Pending;
        debug!(stage = stage.name(), ?status, "Stage queued");

        status = StageStatus::Executing;
        info!(stage = stage.name(), number = stage.number(), ?status, "Stage started");

        let mut metadata = StageMetadata {
            stage_name: stage.name().to_string(),
            stage_number: stage.number(),
            status,
            started_at,
            execution_time_ms: 0,
            agents_used: Vec::new(),
            tokens_used: estimate_tokens(&input.text),
            options,
            error: None,
            compliance: None,
            uncertainty: None,
            rag_info: None,
        };

        let result = if input.cancel.is_cancelled() {
            Err(StationsError::stage(stage.name(), "cancelled before start"))
        } else {
            stage.execute(&input, &options).await
        };

        let mut result = match result {
            Ok(result) => result,
            Err(e) => {
                metadata.status = StageStatus::Failed;
                metadata.error = Some(e.to_string());
                metadata.execution_time_ms = started.elapsed().as_millis() as u64;
                error!(stage = stage.name(), error = %e, "Stage failed");
                return StageOutput {
                    result: None,
                    metadata,
                };
            }
        };

        let fields = stage.text_fields(&result);
        if options.enable_compliance {
            metadata.compliance = Some(
                self.check_compliance(stage, &mut result, &fields, &input.text)
                    .await,
            );
        }
        if options.enable_uncertainty {
            // Score the text as it reads after corrections.
            let fields = stage.text_fields(&result);
            metadata.uncertainty = Some(self.quantify(stage, &fields, &input.text).await);
        }
        if options.enable_rag && !input.chunks.is_empty() {
            metadata.rag_info = Some(RagInfo {
                was_chunked: true,
                chunks_count: input.chunks.len(),
                retrieval_time_ms: 0,
            });
        }

        metadata.status = StageStatus::Success;
        metadata.agents_used = stage.agents_used();
        metadata.execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            stage = stage.name(),
            status = ?metadata.status,
            elapsed_ms = metadata.execution_time_ms,
            "Stage finished"
        );
        StageOutput {
            result: Some(result),
            metadata,
        }
    }

    /// Failed output for a stage that never reached a result, e.g. one cut off
    /// by a deadline.
    pub fn failed_output(
        stage: &dyn Stage,
        input: &StageInput,
        started: (Instant, DateTime<Utc>),
        message: String,
    ) -> StageOutput {
        let (started, started_at) = started;
        StageOutput {
            result: None,
            metadata: StageMetadata {
                stage_name: stage.name().to_string(),
                stage_number: stage.number(),
                status: StageStatus::Failed,
                started_at,
                execution_time_ms: started.elapsed().as_millis() as u64,
                agents_used: Vec::new(),
                tokens_used: estimate_tokens(&input.text),
                options: input.options.resolve(&stage.default_options()),
                error: Some(message),
                compliance: None,
                uncertainty: None,
                rag_info: None,
            },
        }
    }

    async fn check_compliance(
        &self,
        stage: &dyn Stage,
        result: &mut Value,
        fields: &[TextField],
        original: &str,
    ) -> ComplianceReport {
        let verdicts = join_all(fields.iter().map(|f| self.checker.check(&f.text, original))).await;

        let mut report = ComplianceReport {
            checked: true,
            compliant: true,
            violations: Vec::new(),
            improvement_score: 1.0,
        };
        let mut patches = Vec::new();
        for (field, verdict) in fields.iter().zip(verdicts) {
            let verdict = match verdict {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(stage = stage.name(), field = %field.pointer, error = %e, "Compliance check failed");
                    return ComplianceReport::failed(&e.to_string());
                }
            };
            if verdict.compliant {
                continue;
            }
            report.compliant = false;
            report.improvement_score = report.improvement_score.min(verdict.improvement_score);
            report.violations.extend(
                verdict
                    .violations
                    .iter()
                    .map(|v| format!("{}: {}", v.principle, v.description)),
            );
            if let Some(corrected) = verdict.corrected_text.filter(|c| *c != field.text) {
                patches.push(FieldPatch {
                    pointer: field.pointer.clone(),
                    replacement: corrected,
                });
            }
        }

        let applied = apply_patches(result, &patches);
        if applied > 0 {
            debug!(stage = stage.name(), applied, "Applied compliance corrections");
        }
        report
    }

    async fn quantify(&self, stage: &dyn Stage, fields: &[TextField], original: &str) -> UncertaintyReport {
        if fields.is_empty() {
            return UncertaintyReport {
                quantified: true,
                overall_confidence: 0.5,
                uncertainty_type: UncertaintyType::Epistemic,
                sources: Vec::new(),
            };
        }

        let contexts: Vec<UncertaintyContext> = fields
            .iter()
            .map(|f| UncertaintyContext {
                stage: stage.name().to_string(),
                field: f.pointer.clone(),
                original: original.to_string(),
            })
            .collect();
        let metrics = join_all(
            fields
                .iter()
                .zip(&contexts)
                .map(|(f, ctx)| self.estimator.quantify(&f.text, ctx)),
        )
        .await;

        let mut total = 0.0;
        let mut uncertainty_type = UncertaintyType::Epistemic;
        let mut sources = Vec::new();
        for m in metrics {
            match m {
                Ok(m) => {
                    total += m.confidence;
                    uncertainty_type = m.uncertainty_type;
                    sources.extend(m.sources);
                }
                Err(e) => {
                    warn!(stage = stage.name(), error = %e, "Uncertainty quantification failed");
                    return UncertaintyReport::failed(&e.to_string());
                }
            }
        }
        sources.truncate(MAX_SOURCES);
        UncertaintyReport {
            quantified: true,
            overall_confidence: total / fields.len() as f64,
            uncertainty_type,
            sources,
        }
    }
}
