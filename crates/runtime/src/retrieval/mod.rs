//! Similar-case retrieval.
//!
//! The reasoning tier consults previously labelled cases through the
//! [`CaseRetriever`] boundary. [`InMemoryCaseIndex`] is a lexical stand-in for
//! a real vector store: term-count vectors compared by cosine similarity.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A labelled case owned by the case corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub text: String,
    pub label: String,
    #[serde(default)]
    pub category: String,
}

/// A case returned from a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCase {
    pub text: String,
    pub label: String,
    pub score: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Case store unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to load case corpus: {0}")]
    Load(String),
}

/// Similarity search over a pre-embedded case corpus.
#[async_trait]
pub trait CaseRetriever: Send + Sync {
    /// Up to `k` cases ordered by descending similarity.
    async fn similarity_search(&self, text: &str, k: usize)
        -> Result<Vec<ScoredCase>, RetrievalError>;
}

/// Cosine similarity over term-count vectors, held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCaseIndex {
    entries: Vec<IndexedCase>,
}

#[derive(Debug)]
struct IndexedCase {
    record: CaseRecord,
    terms: HashMap<String, f32>,
    norm: f32,
}

impl InMemoryCaseIndex {
    pub fn new(records: Vec<CaseRecord>) -> Self {
        let entries = records
            .into_iter()
            .map(|record| {
                let terms = term_counts(&record.text);
                let norm = norm(&terms);
                IndexedCase {
                    record,
                    terms,
                    norm,
                }
            })
            .collect();
        Self { entries }
    }

    /// Load a JSON array of [`CaseRecord`]s.
    pub fn from_json_file(path: &Path) -> Result<Self, RetrievalError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Load(format!("{}: {}", path.display(), e)))?;
        let records: Vec<CaseRecord> = serde_json::from_str(&raw)
            .map_err(|e| RetrievalError::Load(format!("{}: {}", path.display(), e)))?;
        tracing::info!(cases = records.len(), path = %path.display(), "Loaded case corpus");
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CaseRetriever for InMemoryCaseIndex {
    async fn similarity_search(
        &self,
        text: &str,
        k: usize,
    ) -> Result<Vec<ScoredCase>, RetrievalError> {
        let query = term_counts(text);
        let query_norm = norm(&query);
        if query_norm == 0.0 || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredCase> = self
            .entries
            .iter()
            .filter(|e| e.norm > 0.0)
            .filter_map(|e| {
                let dot: f32 = query
                    .iter()
                    .filter_map(|(term, w)| e.terms.get(term).map(|v| v * w))
                    .sum();
                let score = dot / (query_norm * e.norm);
                (score > 0.0).then(|| ScoredCase {
                    text: e.record.text.clone(),
                    label: e.record.label.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF)
}

/// Lowercased alphanumeric words, plus unigrams and bigrams for CJK runs
/// (which are not whitespace separated).
fn term_counts(text: &str) -> HashMap<String, f32> {
    let mut counts: HashMap<String, f32> = HashMap::new();
    let mut word = String::new();
    let mut prev_cjk: Option<char> = None;

    for c in text.to_lowercase().chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                *counts.entry(std::mem::take(&mut word)).or_default() += 1.0;
            }
            *counts.entry(c.to_string()).or_default() += 1.0;
            if let Some(p) = prev_cjk {
                *counts.entry(format!("{p}{c}")).or_default() += 1.0;
            }
            prev_cjk = Some(c);
        } else if c.is_alphanumeric() {
            prev_cjk = None;
            word.push(c);
        } else {
            prev_cjk = None;
            if !word.is_empty() {
                *counts.entry(std::mem::take(&mut word)).or_default() += 1.0;
            }
        }
    }
    if !word.is_empty() {
        *counts.entry(word).or_default() += 1.0;
    }
    counts
}

fn norm(terms: &HashMap<String, f32>) -> f32 {
    terms.values().map(|v| v * v).sum::<f32>().sqrt()
}
