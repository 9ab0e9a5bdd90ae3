//! Turning the model's final text into a verdict.

use serde::Deserialize;

use crate::types::{Action, RequestId, Verdict, VerdictSource};

/// A decision as the model is asked to write it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDecision {
    pub action: Action,
    pub reason: String,
}

#[derive(Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    reason: String,
}

/// Strip surrounding markdown code fences, with or without a language tag.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Language tag: everything up to the first newline, or a leading "json"
    // when the whole block sits on one line.
    let body = match rest.find('\n') {
        Some(idx) if !rest[..idx].contains('{') => &rest[idx + 1..],
        _ => rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse `{"action": ..., "reason": ...}` out of the model's final text.
pub fn parse_decision(text: &str) -> Result<ModelDecision, String> {
    let cleaned = strip_code_fences(text);
    let raw: RawDecision = serde_json::from_str(cleaned).map_err(|e| e.to_string())?;
    let action = raw.action.parse::<Action>()?;
    Ok(ModelDecision {
        action,
        reason: raw.reason,
    })
}

/// Build the verdict for a finished loop. Unparseable output becomes a
/// review verdict whose reason carries the raw text unchanged.
///
/// Returns the verdict and whether parsing succeeded.
pub fn verdict_from_text(request_id: RequestId, text: &str) -> (Verdict, bool) {
    match parse_decision(text) {
        Ok(decision) => (
            Verdict::new(
                request_id,
                decision.action,
                decision.reason,
                VerdictSource::ReasoningTier,
            ),
            true,
        ),
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Unparseable model decision");
            (
                Verdict::review(
                    request_id,
                    format!("model output could not be parsed; raw output: {}", text),
                    VerdictSource::ReasoningTier,
                ),
                false,
            )
        }
    }
}
