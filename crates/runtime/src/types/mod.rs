//! Core types shared by every tier of the moderation pipeline

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::*;

/// Unique identifier for a content submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The decision carried by a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Block,
    Review,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Block => "block",
            Action::Review => "review",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Action::Allow),
            "block" => Ok(Action::Block),
            "review" => Ok(Action::Review),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Which stage of the pipeline produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictSource {
    RuleTier,
    ReasoningTier,
    /// The orchestrator itself, when it substitutes a degraded outcome.
    Gateway,
}

impl VerdictSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictSource::RuleTier => "rule-tier",
            VerdictSource::ReasoningTier => "reasoning-tier",
            VerdictSource::Gateway => "gateway",
        }
    }
}

impl std::fmt::Display for VerdictSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VerdictSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "rule-tier" => Ok(VerdictSource::RuleTier),
            "reasoning-tier" => Ok(VerdictSource::ReasoningTier),
            "gateway" => Ok(VerdictSource::Gateway),
            other => Err(format!("unknown verdict source '{}'", other)),
        }
    }
}

/// A validated submission moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRequest {
    pub request_id: RequestId,
    pub user_id: Option<String>,
    pub content: String,
}

impl ContentRequest {
    /// Validate the submission and assign it a fresh request id.
    ///
    /// Content that is empty or only whitespace is rejected before any tier runs.
    pub fn new(
        content: impl Into<String>,
        user_id: Option<String>,
    ) -> Result<Self, ModerationError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(ModerationError::Validation(
                "content must not be empty".to_string(),
            ));
        }
        Ok(Self {
            request_id: RequestId::new(),
            user_id: user_id.filter(|u| !u.trim().is_empty()),
            content,
        })
    }
}

/// The final decision for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub request_id: RequestId,
    pub action: Action,
    pub reason: String,
    pub source: VerdictSource,
}

impl Verdict {
    pub fn new(
        request_id: RequestId,
        action: Action,
        reason: impl Into<String>,
        source: VerdictSource,
    ) -> Self {
        Self {
            request_id,
            action,
            reason: reason.into(),
            source,
        }
    }

    pub fn allow(request_id: RequestId, reason: impl Into<String>, source: VerdictSource) -> Self {
        Self::new(request_id, Action::Allow, reason, source)
    }

    pub fn block(request_id: RequestId, reason: impl Into<String>, source: VerdictSource) -> Self {
        Self::new(request_id, Action::Block, reason, source)
    }

    pub fn review(request_id: RequestId, reason: impl Into<String>, source: VerdictSource) -> Self {
        Self::new(request_id, Action::Review, reason, source)
    }

    pub fn is_block(&self) -> bool {
        self.action == Action::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_request_rejects_blank_content() {
        assert!(matches!(
            ContentRequest::new("   \n", None),
            Err(ModerationError::Validation(_))
        ));
        assert!(ContentRequest::new("hello", None).is_ok());
    }

    #[test]
    fn test_blank_user_id_is_dropped() {
        let req = ContentRequest::new("hello", Some("  ".into())).unwrap();
        assert!(req.user_id.is_none());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = ContentRequest::new("x", None).unwrap();
        let b = ContentRequest::new("x", None).unwrap();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_verdict_wire_format() {
        let verdict = Verdict::review(RequestId::new(), "needs a human", VerdictSource::Gateway);
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["action"], "review");
        assert_eq!(json["source"], "gateway");
        assert!(json["request_id"].is_string());
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("BLOCK".parse::<Action>().unwrap(), Action::Block);
        assert!("maybe".parse::<Action>().is_err());
        assert_eq!(
            "reasoning-tier".parse::<VerdictSource>().unwrap(),
            VerdictSource::ReasoningTier
        );
    }
}
