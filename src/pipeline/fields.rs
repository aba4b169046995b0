//! Natural-language fields inside stage results.
//!
//! Post-processors only look at a fixed set of locations in a result. Each one
//! is addressed by its JSON pointer so corrections can be written back to that
//! exact spot and nowhere else.

use serde_json::Value;

/// Top-level summary-style keys checked in every result.
pub const SUMMARY_KEYS: &[&str] = &["logline", "storyStatement", "elevatorPitch", "executiveSummary"];

/// A string value located at `pointer` inside a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextField {
    pub pointer: String,
    pub text: String,
}

/// Replacement text for the field at `pointer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPatch {
    pub pointer: String,
    pub replacement: String,
}

/// Escape a key for use as a JSON pointer segment.
fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Collect the checked fields of `result` in a stable order.
///
/// Blank strings are skipped.
pub fn extract_text_fields(result: &Value) -> Vec<TextField> {
    let mut fields = Vec::new();
    let Some(obj) = result.as_object() else {
        return fields;
    };
    let mut push = |pointer: String, value: &Value| {
        if let Some(text) = value.as_str().filter(|t| !t.trim().is_empty()) {
            fields.push(TextField {
                pointer,
                text: text.to_string(),
            });
        }
    };

    for key in SUMMARY_KEYS {
        if let Some(value) = obj.get(*key) {
            push(format!("/{key}"), value);
        }
    }

    if let Some(Value::Object(analysis)) = obj.get("characterAnalysis") {
        for (name, value) in analysis {
            push(format!("/characterAnalysis/{}", escape(name)), value);
        }
    }

    if let Some(Value::Array(primary)) = result.pointer("/themes/primary") {
        for (i, theme) in primary.iter().enumerate() {
            if let Some(description) = theme.get("description") {
                push(format!("/themes/primary/{i}/description"), description);
            }
        }
    }

    fields
}

/// Write each patch at its pointer. Returns how many were applied.
///
/// Pointers that no longer resolve to a string are left alone.
pub fn apply_patches(result: &mut Value, patches: &[FieldPatch]) -> usize {
    let mut applied = 0;
    for patch in patches {
        match result.pointer_mut(&patch.pointer) {
            Some(slot @ Value::String(_)) => {
                *slot = Value::String(patch.replacement.clone());
                applied += 1;
            }
            _ => tracing::debug!(pointer = %patch.pointer, "Patch target missing, skipped"),
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "logline": "A diver returns home.",
            "storyStatement": "  ",
            "characterAnalysis": {
                "Maya": "Driven by guilt.",
                "a/b": "Odd key."
            },
            "themes": { "primary": [
                { "name": "guilt", "description": "Guilt shapes every choice." },
                { "name": "sea" }
            ]},
            "notes": "A diver returns home."
        })
    }

    #[test]
    fn test_extracts_known_locations_only() {
        let pointers: Vec<String> = extract_text_fields(&sample())
            .into_iter()
            .map(|f| f.pointer)
            .collect();
        assert_eq!(
            pointers,
            vec![
                "/logline",
                "/characterAnalysis/Maya",
                "/characterAnalysis/a~1b",
                "/themes/primary/0/description",
            ]
        );
    }

    #[test]
    fn test_patch_touches_only_the_pointer() {
        let mut result = sample();
        let applied = apply_patches(
            &mut result,
            &[
                FieldPatch {
                    pointer: "/logline".into(),
                    replacement: "A diver goes back.".into(),
                },
                FieldPatch {
                    pointer: "/characterAnalysis/a~1b".into(),
                    replacement: "Fixed.".into(),
                },
                FieldPatch {
                    pointer: "/missing".into(),
                    replacement: "x".into(),
                },
            ],
        );
        assert_eq!(applied, 2);
        assert_eq!(result["logline"], "A diver goes back.");
        assert_eq!(result["characterAnalysis"]["a/b"], "Fixed.");
        // Identical text elsewhere stays put.
        assert_eq!(result["notes"], "A diver returns home.");
    }

    #[test]
    fn test_non_object_has_no_fields() {
        assert!(extract_text_fields(&json!("text")).is_empty());
        assert!(extract_text_fields(&Value::Null).is_empty());
    }
}
