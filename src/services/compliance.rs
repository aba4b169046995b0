//! Compliance checking for generated analysis text.
//!
//! A checker judges one piece of generated text against five principles
//! (fidelity to the source, no positive bias, grounding in the analysis,
//! narrative coherence, character consistency) and may hand back a corrected
//! version.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::{validators, GenerateRequest, ModelClient};
use crate::utils::text::truncate_chars;
use crate::StationsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principle {
    TextFidelity,
    NoPositiveBias,
    AnalysisBased,
    NarrativeCoherence,
    CharacterConsistency,
}

impl Principle {
    pub const ALL: [Principle; 5] = [
        Principle::TextFidelity,
        Principle::NoPositiveBias,
        Principle::AnalysisBased,
        Principle::NarrativeCoherence,
        Principle::CharacterConsistency,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::TextFidelity => "Original Text Fidelity",
            Self::NoPositiveBias => "No Positive Bias",
            Self::AnalysisBased => "Analysis-Report Based",
            Self::NarrativeCoherence => "Narrative Coherence",
            Self::CharacterConsistency => "Character Consistency",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::TextFidelity => "All developments must respect and build upon the original text",
            Self::NoPositiveBias => "Avoid unrealistic positive feedback",
            Self::AnalysisBased => "Development must be informed by the analysis",
            Self::NarrativeCoherence => "Ensure logical coherence in narrative development",
            Self::CharacterConsistency => "Maintain character consistency throughout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipleViolation {
    /// Principle name as reported by the checker.
    pub principle: String,
    pub description: String,
}

impl PrincipleViolation {
    pub fn new(principle: Principle, description: impl Into<String>) -> Self {
        Self {
            principle: principle.name().to_string(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceVerdict {
    pub compliant: bool,
    #[serde(default)]
    pub violations: Vec<PrincipleViolation>,
    /// 0..=1, 1 meaning nothing to improve.
    pub improvement_score: f64,
    #[serde(default)]
    pub corrected_text: Option<String>,
}

impl ComplianceVerdict {
    pub fn compliant() -> Self {
        Self {
            compliant: true,
            violations: Vec::new(),
            improvement_score: 1.0,
            corrected_text: None,
        }
    }
}

/// Judges a single generated text against the principles.
#[async_trait]
pub trait ComplianceChecker: Send + Sync {
    /// `original` is the source text the analysis was derived from.
    async fn check(&self, text: &str, original: &str) -> Result<ComplianceVerdict, StationsError>;
}

// ---------------------------------------------------------------------------
// Rule-based checker
// ---------------------------------------------------------------------------

/// Hype words and their measured replacements.
const POSITIVE_BIAS: &[(&str, &str)] = &[
    ("masterpiece", "work"),
    ("brilliant", "effective"),
    ("brilliantly", "effectively"),
    ("flawless", "well-executed"),
    ("flawlessly", "capably"),
    ("perfect", "strong"),
    ("perfectly", "clearly"),
    ("genius", "skilled"),
    ("stunning", "striking"),
    ("outstanding", "notable"),
    ("extraordinary", "notable"),
    ("incredible", "notable"),
    ("amazing", "notable"),
    ("exceptional", "notable"),
];

const PLACEHOLDERS: &[&str] = &["todo", "tbd", "n/a", "lorem ipsum", "...", "placeholder"];

const MIN_WORDS: usize = 3;
const MIN_QUOTE_CHARS: usize = 12;

/// Deterministic checker; needs no model calls.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedComplianceChecker;

impl RuleBasedComplianceChecker {
    pub fn new() -> Self {
        Self
    }

    fn hype_words(text: &str) -> Vec<&'static str> {
        let mut found = Vec::new();
        for word in text.split(|c: char| !c.is_alphanumeric() && c != '-') {
            let lower = word.to_lowercase();
            if let Some((hype, _)) = POSITIVE_BIAS.iter().find(|(h, _)| *h == lower) {
                if !found.contains(hype) {
                    found.push(*hype);
                }
            }
        }
        found
    }

    /// Replace hype words with their measured counterparts, keeping capitalization.
    fn tone_down(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut word = String::new();
        let flush = |word: &mut String, out: &mut String| {
            if word.is_empty() {
                return;
            }
            let lower = word.to_lowercase();
            match POSITIVE_BIAS.iter().find(|(h, _)| *h == lower) {
                Some((_, calm)) => {
                    let starts_upper = word.chars().next().is_some_and(char::is_uppercase);
                    if starts_upper {
                        let mut chars = calm.chars();
                        if let Some(first) = chars.next() {
                            out.extend(first.to_uppercase());
                            out.push_str(chars.as_str());
                        }
                    } else {
                        out.push_str(calm);
                    }
                }
                None => out.push_str(word),
            }
            word.clear();
        };
        for c in text.chars() {
            if c.is_alphanumeric() || c == '-' {
                word.push(c);
            } else {
                flush(&mut word, &mut out);
                out.push(c);
            }
        }
        flush(&mut word, &mut out);
        out
    }

    fn unbalanced(text: &str) -> Option<String> {
        for (open, close) in [('(', ')'), ('[', ']'), ('{', '}')] {
            let opens = text.matches(open).count();
            let closes = text.matches(close).count();
            if opens != closes {
                return Some(format!("unbalanced '{open}{close}' ({opens} open, {closes} close)"));
            }
        }
        if text.matches('"').count() % 2 == 1 {
            return Some("unbalanced quotation marks".to_string());
        }
        None
    }

    /// Quoted passages that do not occur in the original.
    fn invented_quotes<'a>(text: &'a str, original: &str) -> Vec<&'a str> {
        if original.trim().is_empty() {
            return Vec::new();
        }
        let original_lower = original.to_lowercase();
        text.split('"')
            .skip(1)
            .step_by(2)
            .map(str::trim)
            .filter(|q| q.chars().count() >= MIN_QUOTE_CHARS)
            .filter(|q| !original_lower.contains(&q.to_lowercase()))
            .collect()
    }
}

#[async_trait]
impl ComplianceChecker for RuleBasedComplianceChecker {
    async fn check(&self, text: &str, original: &str) -> Result<ComplianceVerdict, StationsError> {
        let mut violations = Vec::new();
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();

        if trimmed.split_whitespace().count() < MIN_WORDS || PLACEHOLDERS.contains(&lower.as_str())
        {
            violations.push(PrincipleViolation::new(
                Principle::AnalysisBased,
                "text is too thin to reflect any analysis",
            ));
        }

        let hype = Self::hype_words(trimmed);
        if !hype.is_empty() {
            violations.push(PrincipleViolation::new(
                Principle::NoPositiveBias,
                format!("exaggerated praise: {}", hype.join(", ")),
            ));
        }

        if let Some(problem) = Self::unbalanced(trimmed) {
            violations.push(PrincipleViolation::new(Principle::NarrativeCoherence, problem));
        }

        for quote in Self::invented_quotes(trimmed, original) {
            violations.push(PrincipleViolation::new(
                Principle::TextFidelity,
                format!("quotes text not found in the original: \"{}\"", truncate_chars(quote, 60)),
            ));
        }

        if violations.is_empty() {
            return Ok(ComplianceVerdict::compliant());
        }
        let corrected_text = (!hype.is_empty()).then(|| Self::tone_down(text));
        Ok(ComplianceVerdict {
            compliant: false,
            improvement_score: (1.0 - 0.2 * violations.len() as f64).max(0.0),
            violations,
            corrected_text,
        })
    }
}

// ---------------------------------------------------------------------------
// Model-backed checker
// ---------------------------------------------------------------------------

/// Asks the model for a JSON verdict.
pub struct ModelComplianceChecker {
    client: Arc<ModelClient>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelVerdict {
    compliant: bool,
    #[serde(default)]
    violations: Vec<PrincipleViolation>,
    #[serde(default)]
    improvement_score: Option<f64>,
    #[serde(default)]
    corrected_text: Option<String>,
}

impl ModelComplianceChecker {
    pub fn new(client: Arc<ModelClient>) -> Self {
        Self { client }
    }

    fn system_instruction() -> String {
        let principles = Principle::ALL
            .iter()
            .map(|p| format!("- {}: {}", p.name(), p.description()))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Check the analysis you are given against these principles:\n{principles}\n\n\
             Reply with JSON only: {{\"compliant\": bool, \"violations\": [{{\"principle\": string, \"description\": string}}], \
             \"improvementScore\": number between 0 and 1, \"correctedText\": string or null}}"
        )
    }

    /// The checked text opens the prompt; cache keys only see its prefix.
    fn prompt(text: &str, original: &str) -> String {
        format!(
            "Analysis:\n\"\"\"\n{text}\n\"\"\"\n\n\
             Original text (excerpt):\n\"\"\"\n{}\n\"\"\"",
            truncate_chars(original, 2000)
        )
    }

    fn request(text: &str, original: &str) -> GenerateRequest {
        GenerateRequest::new(Self::prompt(text, original))
            .with_system(Self::system_instruction())
            .with_temperature(0.2)
            .with_max_tokens(2048)
            .with_validator(validators::json_object())
    }
}

#[async_trait]
impl ComplianceChecker for ModelComplianceChecker {
    async fn check(&self, text: &str, original: &str) -> Result<ComplianceVerdict, StationsError> {
        let response = self.client.generate(Self::request(text, original)).await?;
        let parsed: ModelVerdict = serde_json::from_value(response.value())?;

        let compliant = parsed.compliant && parsed.violations.is_empty();
        Ok(ComplianceVerdict {
            compliant,
            improvement_score: parsed
                .improvement_score
                .unwrap_or(if compliant { 1.0 } else { 0.5 })
                .clamp(0.0, 1.0),
            violations: parsed.violations,
            corrected_text: parsed.corrected_text.filter(|t| !t.trim().is_empty()),
        })
    }
}
