pub mod fields;
pub mod network;
pub mod orchestrator;
pub mod stage;
pub mod stations;

pub use fields::{apply_patches, extract_text_fields, FieldPatch, TextField};
pub use network::{merge_network, register_characters, MergeSummary};
pub use orchestrator::{Pipeline, PipelineReport, RunOptions};
pub use stage::{
    ComplianceReport, RagInfo, ResolvedOptions, Stage, StageInput, StageMetadata, StageOptions,
    StageOutput, StageRunner, StageStatus, UncertaintyReport,
};
pub use stations::{build_stage, stage_registry, PromptStage, StageDeps, StageFactory, StageKind};
