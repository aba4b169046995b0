pub mod compliance;
pub mod diagnostics;
pub mod uncertainty;

pub use compliance::{
    ComplianceChecker, ComplianceVerdict, ModelComplianceChecker, Principle, PrincipleViolation,
    RuleBasedComplianceChecker,
};
pub use diagnostics::{CriticalityLevel, DiagnosticsEngine, DiagnosticsReport, Severity};
pub use uncertainty::{
    HeuristicUncertaintyEstimator, SamplingUncertaintyEstimator, UncertaintyContext,
    UncertaintyEstimator, UncertaintyMetrics, UncertaintySource, UncertaintyType,
};
