//! Confidence scoring for generated analysis text.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::{GenerateRequest, ModelClient};
use crate::utils::text::{jaccard_similarity, truncate_chars};
use crate::StationsError;

/// Sources kept per field.
pub const MAX_SOURCES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyType {
    /// Lack of knowledge; more information would reduce it.
    Epistemic,
    /// Inherent ambiguity in the material.
    Aleatoric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintySource {
    pub aspect: String,
    pub reason: String,
    pub reducible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertaintyMetrics {
    /// 0..=1
    pub confidence: f64,
    pub uncertainty_type: UncertaintyType,
    pub sources: Vec<UncertaintySource>,
}

/// What the estimator knows about the text being scored.
#[derive(Debug, Clone, Default)]
pub struct UncertaintyContext {
    /// Name of the stage that produced the text.
    pub stage: String,
    /// JSON pointer of the field inside the stage result.
    pub field: String,
    /// Source material the analysis was derived from.
    pub original: String,
}

#[async_trait]
pub trait UncertaintyEstimator: Send + Sync {
    async fn quantify(
        &self,
        text: &str,
        context: &UncertaintyContext,
    ) -> Result<UncertaintyMetrics, StationsError>;
}

// ---------------------------------------------------------------------------
// Heuristic estimator
// ---------------------------------------------------------------------------

const HEDGES: &[&str] = &[
    "maybe",
    "perhaps",
    "possibly",
    "probably",
    "likely",
    "unclear",
    "uncertain",
    "seems",
    "appears",
    "might",
    "could",
    "suggests",
    "ambiguous",
    "arguably",
];

const BRIEF_WORDS: usize = 8;

/// Scores text from its own wording: hedges, brevity and open questions.
#[derive(Debug, Clone, Default)]
pub struct HeuristicUncertaintyEstimator;

impl HeuristicUncertaintyEstimator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UncertaintyEstimator for HeuristicUncertaintyEstimator {
    async fn quantify(
        &self,
        text: &str,
        context: &UncertaintyContext,
    ) -> Result<UncertaintyMetrics, StationsError> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let mut confidence: f64 = 0.9;
        let mut sources = Vec::new();

        let hedges: Vec<&str> = HEDGES
            .iter()
            .copied()
            .filter(|h| words.iter().any(|w| w == h))
            .collect();
        if !hedges.is_empty() {
            confidence -= 0.1 * hedges.len().min(4) as f64;
            sources.push(UncertaintySource {
                aspect: context.field.clone(),
                reason: format!("hedged wording: {}", hedges.join(", ")),
                reducible: true,
            });
        }

        if words.len() < BRIEF_WORDS {
            confidence -= 0.2;
            sources.push(UncertaintySource {
                aspect: context.field.clone(),
                reason: "too brief to support a firm reading".to_string(),
                reducible: true,
            });
        }

        let questions = text.matches('?').count();
        if questions > 0 {
            confidence -= 0.1 * questions.min(3) as f64;
            sources.push(UncertaintySource {
                aspect: context.field.clone(),
                reason: format!("{questions} open question(s) in the text"),
                reducible: false,
            });
        }

        // Open questions point at ambiguity in the material itself.
        let uncertainty_type = if questions > 0 && hedges.is_empty() {
            UncertaintyType::Aleatoric
        } else {
            UncertaintyType::Epistemic
        };
        sources.truncate(MAX_SOURCES);

        Ok(UncertaintyMetrics {
            confidence: confidence.clamp(0.1, 1.0),
            uncertainty_type,
            sources,
        })
    }
}

// ---------------------------------------------------------------------------
// Sampling estimator
// ---------------------------------------------------------------------------

/// Regenerates the analysis several times and measures how much the samples agree.
pub struct SamplingUncertaintyEstimator {
    client: Arc<ModelClient>,
    samples: usize,
}

impl SamplingUncertaintyEstimator {
    pub fn new(client: Arc<ModelClient>, samples: usize) -> Self {
        Self {
            client,
            samples: samples.max(2),
        }
    }

    fn prompt(text: &str, context: &UncertaintyContext) -> String {
        format!(
            "Independently restate the following {} analysis ({}) in your own words, \
             based on the source excerpt.\n\nAnalysis:\n{}\n\nSource excerpt:\n{}",
            context.stage,
            context.field,
            text,
            truncate_chars(&context.original, 2000)
        )
    }
}

/// Mean pairwise Jaccard similarity of the samples.
pub fn sample_consistency(samples: &[String]) -> f64 {
    if samples.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..samples.len() {
        for j in (i + 1)..samples.len() {
            total += jaccard_similarity(&samples[i], &samples[j]);
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Words that some but not all samples repeat, most frequent first.
pub fn divergent_aspects(samples: &[String]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for sample in samples {
        for word in sample.split_whitespace() {
            *counts.entry(word.to_lowercase()).or_default() += 1;
        }
    }
    let mut words: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(word, count)| *count > 1 && *count < samples.len() && word.chars().count() > 5)
        .collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.into_iter().take(MAX_SOURCES).map(|(w, _)| w).collect()
}

#[async_trait]
impl UncertaintyEstimator for SamplingUncertaintyEstimator {
    async fn quantify(
        &self,
        text: &str,
        context: &UncertaintyContext,
    ) -> Result<UncertaintyMetrics, StationsError> {
        let prompt = Self::prompt(text, context);
        let calls = (0..self.samples).map(|i| {
            // Vary temperature so samples are not served from one cache entry.
            let request = GenerateRequest::new(prompt.clone())
                .with_temperature(0.7 + 0.05 * i as f32)
                .with_max_tokens(1024);
            self.client.generate(request)
        });

        let mut samples = Vec::with_capacity(self.samples);
        for result in join_all(calls).await {
            match result {
                Ok(response) => samples.push(response.content),
                Err(e) => warn!(field = %context.field, error = %e, "Uncertainty sample failed"),
            }
        }
        if samples.len() < 2 {
            return Err(StationsError::Validation(format!(
                "only {} of {} uncertainty samples succeeded",
                samples.len(),
                self.samples
            )));
        }

        let confidence = sample_consistency(&samples);
        let sources = divergent_aspects(&samples)
            .into_iter()
            .map(|aspect| UncertaintySource {
                aspect,
                reason: "samples disagree on this point".to_string(),
                reducible: true,
            })
            .collect();
        Ok(UncertaintyMetrics {
            confidence,
            uncertainty_type: if confidence < 0.5 {
                UncertaintyType::Aleatoric
            } else {
                UncertaintyType::Epistemic
            },
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> UncertaintyContext {
        UncertaintyContext {
            stage: "Text Analysis".into(),
            field: "/logline".into(),
            original: String::new(),
        }
    }

    #[tokio::test]
    async fn test_assertive_text_scores_high() {
        let metrics = HeuristicUncertaintyEstimator::new()
            .quantify(
                "A retired diver returns to the island to confront the brother who abandoned her.",
                &ctx(),
            )
            .await
            .unwrap();
        assert!((metrics.confidence - 0.9).abs() < 1e-9);
        assert!(metrics.sources.is_empty());
    }

    #[tokio::test]
    async fn test_hedged_brief_text_scores_low() {
        let metrics = HeuristicUncertaintyEstimator::new()
            .quantify("Perhaps a revenge story?", &ctx())
            .await
            .unwrap();
        assert_eq!(metrics.sources.len(), 3);
        assert!(metrics.confidence < 0.6);
        assert_eq!(metrics.uncertainty_type, UncertaintyType::Epistemic);
        assert_eq!(metrics.sources[0].aspect, "/logline");
    }

    #[test]
    fn test_sample_consistency() {
        let same = vec!["a b c".to_string(), "a b c".to_string()];
        assert_eq!(sample_consistency(&same), 1.0);

        let apart = vec!["a b".to_string(), "c d".to_string(), "a b".to_string()];
        // pairs: 0.0, 1.0, 0.0
        assert!((sample_consistency(&apart) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_divergent_aspects_needs_partial_agreement() {
        let samples = vec![
            "betrayal drives everything".to_string(),
            "betrayal shapes the ending".to_string(),
            "grief shapes everything".to_string(),
        ];
        // "the" and "ending" are too short or unrepeated; "grief" appears once.
        assert_eq!(divergent_aspects(&samples), vec!["betrayal", "everything", "shapes"]);
    }
}
