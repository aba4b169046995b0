//! The seven analysis stations and their compile-time registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::network::{merge_network, register_characters};
use super::stage::{ResolvedOptions, Stage, StageInput};
use crate::client::{validators, GenerateRequest, ModelClient};
use crate::models::SharedGraph;
use crate::services::DiagnosticsEngine;
use crate::utils::text::truncate_chars;
use crate::StationsError;

/// Characters of earlier results passed along as context.
const PREVIOUS_CONTEXT_CHARS: usize = 6000;

const SYSTEM_INSTRUCTION: &str = "You are a dramaturg analysing a narrative text. \
Base every statement on the text itself, avoid praise that the text does not earn, \
and reply with a single JSON object and nothing else.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    TextAnalysis = 1,
    ConceptualAnalysis = 2,
    NetworkBuilder = 3,
    EfficiencyMetrics = 4,
    DynamicSymbolicStylistic = 5,
    DiagnosticsTreatment = 6,
    Finalization = 7,
}

impl StageKind {
    pub const ALL: [StageKind; 7] = [
        StageKind::TextAnalysis,
        StageKind::ConceptualAnalysis,
        StageKind::NetworkBuilder,
        StageKind::EfficiencyMetrics,
        StageKind::DynamicSymbolicStylistic,
        StageKind::DiagnosticsTreatment,
        StageKind::Finalization,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.number() == number)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TextAnalysis => "Text Analysis",
            Self::ConceptualAnalysis => "Conceptual Analysis",
            Self::NetworkBuilder => "Network Builder",
            Self::EfficiencyMetrics => "Efficiency Metrics",
            Self::DynamicSymbolicStylistic => "Dynamic, Symbolic & Stylistic Analysis",
            Self::DiagnosticsTreatment => "Diagnostics & Treatment",
            Self::Finalization => "Finalization",
        }
    }

    fn agents(self) -> &'static [&'static str] {
        match self {
            Self::TextAnalysis => &[
                "Logline Generator",
                "Character Identifier",
                "Character Deep Analyzer",
                "Dialogue Forensics",
                "Narrative Style Analyzer",
            ],
            Self::ConceptualAnalysis => &[
                "Story Statement Generator",
                "Genre Analyzer",
                "Theme Analyzer",
                "Target Audience Identifier",
            ],
            Self::NetworkBuilder => &[
                "Relationship Inference Engine",
                "Conflict Inference Engine",
                "Network Analyzer",
            ],
            Self::EfficiencyMetrics => &[
                "Efficiency Metrics",
                "Literary Quality Analyzer",
                "Producibility Analyzer",
                "Rhythm Mapping Agent",
            ],
            Self::DynamicSymbolicStylistic => {
                &["Dynamic Analyzer", "Symbolic Analyzer", "Stylistic Analyzer"]
            }
            Self::DiagnosticsTreatment => &["Network Diagnostics", "Treatment Planner"],
            Self::Finalization => &["Score Matrix Builder", "Final Report Writer"],
        }
    }

    /// Task and expected JSON shape for this station.
    fn instructions(self) -> &'static str {
        match self {
            Self::TextAnalysis => {
                "Identify the logline and the major characters, and analyse each character.\n\
                 JSON: {\"logline\": string, \"characters\": [{\"name\": string, \"description\": string}], \
                 \"characterAnalysis\": {\"<name>\": string}, \"narrativeStyle\": string}"
            }
            Self::ConceptualAnalysis => {
                "State the story statement, elevator pitch, genre and themes.\n\
                 JSON: {\"storyStatement\": string, \"elevatorPitch\": string, \"genre\": string, \
                 \"themes\": {\"primary\": [{\"name\": string, \"description\": string}], \"secondary\": [string]}, \
                 \"targetAudience\": string}"
            }
            Self::NetworkBuilder => {
                "Build the character network: relationships and conflicts between characters. \
                 Strengths are numbers from 0 to 10.\n\
                 JSON: {\"characters\": [{\"name\": string, \"description\": string}], \
                 \"relationships\": [{\"source\": string, \"target\": string, \"type\": \
                 \"family|friendship|romantic|professional|antagonistic|mentorship|other\", \
                 \"strength\": number, \"description\": string}], \
                 \"conflicts\": [{\"name\": string, \"involvedCharacters\": [string], \"subject\": \
                 \"relationship|power|ideology|resources|information|territory|honor|other\", \
                 \"scope\": \"personal|group|societal\", \"phase\": \
                 \"emerging|escalating|peak|resolving|resolved\", \"strength\": number, \"description\": string}]}"
            }
            Self::EfficiencyMetrics => {
                "Assess narrative efficiency: pacing, scene economy and producibility, each scored 0 to 10.\n\
                 JSON: {\"executiveSummary\": string, \"pacing\": number, \"sceneEconomy\": number, \
                 \"producibility\": number, \"rhythmNotes\": [string]}"
            }
            Self::DynamicSymbolicStylistic => {
                "Analyse how the story evolves, its recurring symbols and its style.\n\
                 JSON: {\"executiveSummary\": string, \"dynamics\": [string], \
                 \"symbols\": [{\"symbol\": string, \"meaning\": string}], \"style\": string}"
            }
            Self::DiagnosticsTreatment => {
                "Propose a treatment plan for the weaknesses in the narrative, using the \
                 network diagnostics in the context.\n\
                 JSON: {\"executiveSummary\": string, \"treatments\": [{\"issue\": string, \
                 \"recommendation\": string, \"priority\": \"high|medium|low\"}]}"
            }
            Self::Finalization => {
                "Write the final report from the previous station results, with a score matrix \
                 (0 to 10 per area).\n\
                 JSON: {\"executiveSummary\": string, \"scoreMatrix\": {\"foundation\": number, \
                 \"conceptual\": number, \"conflictNetwork\": number, \"efficiency\": number, \
                 \"dynamicSymbolic\": number, \"diagnostics\": number, \"overall\": number}, \
                 \"strengths\": [string], \"weaknesses\": [string]}"
            }
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.number(), self.name())
    }
}

/// Shared collaborators handed to every station.
#[derive(Clone)]
pub struct StageDeps {
    pub client: Arc<ModelClient>,
    pub graph: SharedGraph,
    pub diagnostics: DiagnosticsEngine,
    /// Longest input text sent to the model.
    pub max_prompt_chars: usize,
}

pub type StageFactory = fn(StageDeps) -> Arc<dyn Stage>;

macro_rules! registry {
    ($($factory:ident => $kind:ident),* $(,)?) => {
        $(
            fn $factory(deps: StageDeps) -> Arc<dyn Stage> {
                Arc::new(PromptStage::new(StageKind::$kind, deps))
            }
        )*

        static REGISTRY: [(StageKind, StageFactory); 7] = [
            $((StageKind::$kind, $factory as StageFactory)),*
        ];
    };
}

registry! {
    text_analysis => TextAnalysis,
    conceptual_analysis => ConceptualAnalysis,
    network_builder => NetworkBuilder,
    efficiency_metrics => EfficiencyMetrics,
    dynamic_symbolic_stylistic => DynamicSymbolicStylistic,
    diagnostics_treatment => DiagnosticsTreatment,
    finalization => Finalization,
}

/// Station factories in pipeline order.
pub fn stage_registry() -> &'static [(StageKind, StageFactory)] {
    &REGISTRY
}

pub fn build_stage(kind: StageKind, deps: StageDeps) -> Arc<dyn Stage> {
    // Registry slots are ordered by station number.
    let (_, factory) = REGISTRY[usize::from(kind.number() - 1)];
    factory(deps)
}

// =============================================================================
// PROMPT STAGE
// =============================================================================

/// A station that asks the model for one JSON object and post-processes it
/// against the graph where the station calls for it.
pub struct PromptStage {
    kind: StageKind,
    deps: StageDeps,
}

impl PromptStage {
    pub fn new(kind: StageKind, deps: StageDeps) -> Self {
        Self { kind, deps }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    fn system_instruction(kind: StageKind) -> String {
        format!(
            "Station {}: {}.\n{}\n\n{}",
            kind.number(),
            kind.name(),
            kind.instructions(),
            SYSTEM_INSTRUCTION
        )
    }

    fn previous_context(previous: &BTreeMap<u8, Value>) -> Option<String> {
        if previous.is_empty() {
            return None;
        }
        let summary: BTreeMap<String, &Value> = previous
            .iter()
            .map(|(n, v)| (format!("station{n}"), v))
            .collect();
        let text = serde_json::to_string(&summary).ok()?;
        Some(truncate_chars(&text, PREVIOUS_CONTEXT_CHARS).to_string())
    }

    fn build_request(
        kind: StageKind,
        max_prompt_chars: usize,
        input: &StageInput,
        options: &ResolvedOptions,
        extra_context: Option<String>,
    ) -> GenerateRequest {
        // Cache keys only see a prefix of the prompt and of the system
        // instruction: the text leads the prompt, the station leads the system.
        let text = truncate_chars(&input.text, max_prompt_chars);
        let mut prompt = format!("Text:\n\"\"\"\n{text}\n\"\"\"");
        if options.enable_rag && !input.chunks.is_empty() {
            prompt.push_str("\n\nRelevant excerpts:\n");
            for chunk in &input.chunks {
                prompt.push_str("- ");
                prompt.push_str(chunk);
                prompt.push('\n');
            }
        }

        let context = match (Self::previous_context(&input.previous_results), extra_context) {
            (Some(prev), Some(extra)) => Some(format!("{prev}\n\n{extra}")),
            (prev, extra) => prev.or(extra),
        };
        let mut request = GenerateRequest::new(prompt)
            .with_system(Self::system_instruction(kind))
            .with_temperature(options.temperature)
            .with_max_tokens(options.max_tokens)
            .with_validator(validators::json_object())
            .with_partial_fallback(validators::partial_json());
        if let Some(context) = context {
            request = request.with_context(context);
        }
        request
    }

    async fn request(
        &self,
        input: &StageInput,
        options: &ResolvedOptions,
        extra_context: Option<String>,
    ) -> Result<Value, StationsError> {
        let request = Self::build_request(
            self.kind,
            self.deps.max_prompt_chars,
            input,
            options,
            extra_context,
        );
        let response = self
            .deps
            .client
            .generate_with_cancel(request, &input.cancel)
            .await?;
        let value = response.value();
        if !value.is_object() {
            return Err(StationsError::stage(self.kind.name(), "model did not return a JSON object"));
        }
        Ok(value)
    }
}

#[async_trait]
impl Stage for PromptStage {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn number(&self) -> u8 {
        self.kind.number()
    }

    fn agents_used(&self) -> Vec<String> {
        self.kind.agents().iter().map(|a| a.to_string()).collect()
    }

    async fn execute(
        &self,
        input: &StageInput,
        options: &ResolvedOptions,
    ) -> Result<Value, StationsError> {
        match self.kind {
            StageKind::TextAnalysis => {
                let result = self.request(input, options, None).await?;
                let summary = register_characters(&mut *self.deps.graph.write().await, &result);
                info!(added = summary.characters_added, "Registered characters");
                Ok(result)
            }
            StageKind::NetworkBuilder => {
                let mut result = self.request(input, options, None).await?;
                let summary = {
                    let mut graph = self.deps.graph.write().await;
                    merge_network(&mut graph, &result, Utc::now())
                };
                info!(
                    characters = summary.characters_added,
                    relationships = summary.relationships_added,
                    conflicts = summary.conflicts_added,
                    skipped = summary.skipped,
                    "Merged network into graph"
                );
                if let Some(obj) = result.as_object_mut() {
                    obj.insert("mergeSummary".into(), serde_json::to_value(summary)?);
                }
                Ok(result)
            }
            StageKind::DiagnosticsTreatment => {
                let snapshot = self.deps.graph.snapshot().await;
                let report = self.deps.diagnostics.run_all_diagnostics(&snapshot);
                let report_json = serde_json::to_value(&report)?;
                let extra = format!(
                    "Network diagnostics:\n{}",
                    truncate_chars(&report_json.to_string(), PREVIOUS_CONTEXT_CHARS)
                );
                let mut result = self.request(input, options, Some(extra)).await?;
                if let Some(obj) = result.as_object_mut() {
                    obj.insert("diagnostics".into(), report_json);
                }
                Ok(result)
            }
            _ => self.request(input, options, None).await,
        }
    }
}
