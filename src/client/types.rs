//! Request/response types for the model client.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ModelError;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 8192;
pub const DEFAULT_TOP_P: f32 = 0.95;
pub const DEFAULT_TOP_K: u32 = 40;

// =============================================================================
// MODELS
// =============================================================================

/// Allow-listed text-generation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(rename = "gemini-2.5-pro")]
    Pro,
    #[serde(rename = "gemini-2.5-flash")]
    Flash,
    #[serde(rename = "gemini-2.5-flash-lite")]
    FlashLite,
}

impl ModelId {
    pub const ALL: [ModelId; 3] = [ModelId::Pro, ModelId::Flash, ModelId::FlashLite];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Pro => "gemini-2.5-pro",
            ModelId::Flash => "gemini-2.5-flash",
            ModelId::FlashLite => "gemini-2.5-flash-lite",
        }
    }

    /// Comma-separated allow-list, used in error messages.
    pub fn allowed() -> String {
        Self::ALL
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| ModelError::InvalidModel {
                model: s.to_string(),
                allowed: Self::allowed(),
            })
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// Turns raw response text into a structured value, or explains why it can't.
pub type Validator = Arc<dyn Fn(&str) -> Result<Value, String> + Send + Sync>;

/// Salvages a partial structured value from text that failed validation.
pub type PartialFallback = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// A single generation request.
#[derive(Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub context: Option<String>,
    pub system_instruction: Option<String>,
    /// Model override; must name an allow-listed model.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
    pub validator: Option<Validator>,
    pub allow_partial: bool,
    pub on_partial_fallback: Option<PartialFallback>,
}

impl fmt::Debug for GenerateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerateRequest")
            .field("prompt_len", &self.prompt.len())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("has_validator", &self.validator.is_some())
            .field("allow_partial", &self.allow_partial)
            .finish()
    }
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_instruction = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_stop_sequences(mut self, stops: Vec<String>) -> Self {
        self.stop_sequences = stops;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Accept a partial value from `fallback` when validation fails.
    pub fn with_partial_fallback(mut self, fallback: PartialFallback) -> Self {
        self.allow_partial = true;
        self.on_partial_fallback = Some(fallback);
        self
    }

    /// The prompt sent over the wire: system instruction, context, then prompt.
    pub fn full_prompt(&self) -> String {
        let mut full = String::new();
        if let Some(system) = self.system_instruction.as_deref().filter(|s| !s.is_empty()) {
            full.push_str("System Instructions: ");
            full.push_str(system);
            full.push_str("\n\n");
        }
        if let Some(context) = self.context.as_deref().filter(|c| !c.is_empty()) {
            full.push_str("Context: ");
            full.push_str(context);
            full.push_str("\n\n");
        }
        full.push_str(&self.prompt);
        full
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub timestamp: DateTime<Utc>,
    /// Latency of the successful attempt in milliseconds.
    pub latency: u64,
    pub cached: bool,
    /// Failed attempts before this response was produced.
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub model: ModelId,
    /// Raw response text.
    pub content: String,
    /// Validator output (or partial fallback value) when a validator was supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    pub usage: Usage,
    pub metadata: ResponseMetadata,
}

impl GenerateResponse {
    /// Structured value if present, otherwise `{"raw": content}`.
    pub fn value(&self) -> Value {
        self.structured
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "raw": self.content }))
    }
}

// =============================================================================
// VALIDATORS
// =============================================================================

/// Ready-made validators and partial fallbacks.
pub mod validators {
    use super::{PartialFallback, Validator};
    use crate::utils::text::extract_json_object;
    use std::sync::Arc;

    /// Requires the response to contain a JSON object.
    pub fn json_object() -> Validator {
        Arc::new(|text: &str| {
            extract_json_object(text).ok_or_else(|| "response contains no JSON object".to_string())
        })
    }

    /// Wraps unparseable text as `{"raw": text}`.
    pub fn partial_json() -> PartialFallback {
        Arc::new(|text: &str| {
            if text.trim().is_empty() {
                None
            } else {
                Some(serde_json::json!({ "raw": text }))
            }
        })
    }
}
