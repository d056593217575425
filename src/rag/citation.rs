//! Citation resolution.
//!
//! Maps a generated answer back to a passage id drawn only from the context
//! window that produced it. Two strategies:
//!
//! 1. Explicit tag: parse the first well-formed id token the model emitted
//!    and validate it against the context id set; fall back to (2) if the
//!    tag is missing or names an id outside the context.
//! 2. Nearest context: embed the answer and score it against the context
//!    passages' vectors only — never the whole index.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{EngineError, Result};
use crate::index::EmbeddingsIndex;
use crate::vector::math;
use super::context_builder::Passage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationStrategy {
    /// Parse an explicit id tag, falling back to nearest-context.
    ExplicitTag,
    /// Always resolve by answer-to-passage similarity.
    NearestContext,
}

impl Default for CitationStrategy {
    fn default() -> Self {
        CitationStrategy::ExplicitTag
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationConfig {
    #[serde(default)]
    pub strategy: CitationStrategy,
    /// Pattern whose first capture group is the cited id.
    pub tag_pattern: String,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            strategy: CitationStrategy::ExplicitTag,
            tag_pattern: r"(?i)ARTICLE ID:\s*([A-Za-z0-9_\-]+)".to_string(),
        }
    }
}

pub struct CitationResolver {
    strategy: CitationStrategy,
    tag_pattern: Regex,
}

impl CitationResolver {
    pub fn new(config: &CitationConfig) -> Result<Self> {
        let tag_pattern = Regex::new(&config.tag_pattern).map_err(EngineError::validation)?;
        Ok(Self {
            strategy: config.strategy,
            tag_pattern,
        })
    }

    /// Resolve `answer` to a passage id from `context`, or `None` when the
    /// context is empty.
    pub async fn resolve(
        &self,
        index: &EmbeddingsIndex,
        answer: &str,
        context: &[Passage],
    ) -> Result<Option<String>> {
        if context.is_empty() {
            return Ok(None);
        }

        let context_ids: HashSet<String> = context.iter().map(|p| p.id.clone()).collect();

        if self.strategy == CitationStrategy::ExplicitTag {
            if let Some(id) = self.parse_tag(answer, &context_ids) {
                return Ok(Some(id));
            }
            tracing::debug!("no valid citation tag, falling back to nearest-context");
        }

        self.nearest_context(index, answer, context, &context_ids)
            .await
    }

    /// First tag in the answer naming an id inside the context window.
    fn parse_tag(&self, answer: &str, context_ids: &HashSet<String>) -> Option<String> {
        for captures in self.tag_pattern.captures_iter(answer) {
            let id = captures.get(1)?.as_str();
            if context_ids.contains(id) {
                return Some(id.to_string());
            }
        }
        None
    }

    async fn nearest_context(
        &self,
        index: &EmbeddingsIndex,
        answer: &str,
        context: &[Passage],
        context_ids: &HashSet<String>,
    ) -> Result<Option<String>> {
        if answer.trim().is_empty() {
            return Ok(None);
        }

        let answer_vector = index.embed_query(answer).await?;

        // Passages that live in the index are scored against their stored
        // vectors, scoped to the context window.
        if let Some((id, _score)) = index.nearest_among(&answer_vector, context_ids).await? {
            return Ok(Some(id));
        }

        // Bypass contexts may hold passages the index has never seen;
        // embed their texts directly instead.
        let texts: Vec<String> = context.iter().map(|p| p.text.clone()).collect();
        let vectors = index.embed_texts(&texts).await?;

        let mut best: Option<(usize, f32)> = None;
        for (idx, vector) in vectors.iter().enumerate() {
            let score = math::cosine_similarity(&answer_vector, vector)?;
            if best.is_none_or(|(_, existing)| score > existing) {
                best = Some((idx, score));
            }
        }

        Ok(best.map(|(idx, _)| context[idx].id.clone()))
    }
}
