//! The closed set of tools available to the reasoning tier.
//!
//! Tool calls arrive from the model as `(name, json arguments)`. They are
//! parsed into a [`ModerationTool`] variant with typed arguments before
//! anything runs, so dispatch is an exhaustive `match` rather than a
//! name-keyed lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::inference::{ToolCallRequest, ToolDefinition};
use crate::retrieval::{CaseRetriever, RetrievalError};

pub const SEARCH_SIMILAR_CASES: &str = "search_similar_cases";
pub const CHECK_SENSITIVE_ENTITIES: &str = "check_sensitive_entities";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCasesArgs {
    pub keyword: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEntitiesArgs {
    pub text: String,
}

/// A parsed, typed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationTool {
    SearchSimilarCases(SearchCasesArgs),
    CheckSensitiveEntities(CheckEntitiesArgs),
}

/// The model asked for something that cannot be dispatched.
///
/// These are reported back to the model as the tool result; they do not
/// abort the loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolCallError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
}

/// A tool could not run because its backing service failed.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("case retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
}

impl ModerationTool {
    pub fn parse(call: &ToolCallRequest) -> Result<Self, ToolCallError> {
        let args = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        match call.name.as_str() {
            SEARCH_SIMILAR_CASES => serde_json::from_str::<SearchCasesArgs>(args)
                .map(ModerationTool::SearchSimilarCases)
                .map_err(|e| ToolCallError::InvalidArguments {
                    tool: SEARCH_SIMILAR_CASES,
                    reason: e.to_string(),
                }),
            CHECK_SENSITIVE_ENTITIES => serde_json::from_str::<CheckEntitiesArgs>(args)
                .map(ModerationTool::CheckSensitiveEntities)
                .map_err(|e| ToolCallError::InvalidArguments {
                    tool: CHECK_SENSITIVE_ENTITIES,
                    reason: e.to_string(),
                }),
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModerationTool::SearchSimilarCases(_) => SEARCH_SIMILAR_CASES,
            ModerationTool::CheckSensitiveEntities(_) => CHECK_SENSITIVE_ENTITIES,
        }
    }

    /// Function-tool definitions advertised to the model.
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: SEARCH_SIMILAR_CASES.to_string(),
                description: "Search previously moderated cases similar to a keyword or phrase. \
                              Returns the most similar cases with their moderation label."
                    .to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "keyword": {
                            "type": "string",
                            "description": "Keyword or short phrase to search for"
                        }
                    },
                    "required": ["keyword"]
                }),
            },
            ToolDefinition {
                name: CHECK_SENSITIVE_ENTITIES.to_string(),
                description: "Check a piece of text for sensitive named entities.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "text": {
                            "type": "string",
                            "description": "Text to check"
                        }
                    },
                    "required": ["text"]
                }),
            },
        ]
    }
}

/// A similar case as shown to the model. Scores and categories stay internal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseHit {
    pub text: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    SimilarCases(Vec<CaseHit>),
    EntityNote(String),
}

impl ToolOutput {
    /// Text placed in the transcript as the tool result.
    pub fn render(&self) -> String {
        match self {
            ToolOutput::SimilarCases(hits) if hits.is_empty() => {
                "no similar cases found".to_string()
            }
            ToolOutput::SimilarCases(hits) => {
                serde_json::to_string(hits).unwrap_or_else(|_| "[]".to_string())
            }
            ToolOutput::EntityNote(note) => note.clone(),
        }
    }
}

/// Case-insensitive list of sensitive entity names.
#[derive(Debug, Clone, Default)]
pub struct EntityWatchlist {
    names: Vec<(String, String)>,
}

impl EntityWatchlist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names
            .into_iter()
            .map(Into::into)
            .filter(|n: &String| !n.trim().is_empty())
            .map(|n| (n.to_lowercase(), n))
            .collect();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn check(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let found: Vec<&str> = self
            .names
            .iter()
            .filter(|(needle, _)| lowered.contains(needle.as_str()))
            .map(|(_, original)| original.as_str())
            .collect();
        if found.is_empty() {
            "no sensitive entities found".to_string()
        } else {
            format!("sensitive entities found: {}", found.join(", "))
        }
    }
}

/// Executes parsed tools against their backing services.
pub struct ToolDispatcher {
    retriever: Arc<dyn CaseRetriever>,
    watchlist: EntityWatchlist,
    top_k: usize,
}

impl ToolDispatcher {
    pub fn new(retriever: Arc<dyn CaseRetriever>, watchlist: EntityWatchlist, top_k: usize) -> Self {
        Self {
            retriever,
            watchlist,
            top_k,
        }
    }

    pub async fn dispatch(&self, tool: &ModerationTool) -> Result<ToolOutput, ToolError> {
        match tool {
            ModerationTool::SearchSimilarCases(args) => {
                let hits = self
                    .retriever
                    .similarity_search(&args.keyword, self.top_k)
                    .await?
                    .into_iter()
                    .map(|c| CaseHit {
                        text: c.text,
                        label: c.label,
                    })
                    .collect();
                Ok(ToolOutput::SimilarCases(hits))
            }
            ModerationTool::CheckSensitiveEntities(args) => {
                Ok(ToolOutput::EntityNote(self.watchlist.check(&args.text)))
            }
        }
    }
}
