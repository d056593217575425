//! Context building.
//!
//! Converts a question into the ordered set of passages handed to the
//! generation step: search the index, drop duplicate texts keeping the
//! highest-scored copy, then trim whole passages from the lowest-ranked end
//! until the context fits the budget. Same question against an unchanged
//! index always yields the same context.

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::index::EmbeddingsIndex;

/// A retrieved passage as supplied to the generation step.
pub type Passage = crate::index::SearchResult;

/// Unit the context budget is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetUnit {
    Chars,
    Tokens,
}

impl Default for BudgetUnit {
    fn default() -> Self {
        BudgetUnit::Chars
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// How many passages to retrieve.
    pub k: usize,
    /// Maximum total context size, in `unit`.
    pub max_budget: usize,
    #[serde(default)]
    pub unit: BudgetUnit,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            k: 5,
            max_budget: 4000,
            unit: BudgetUnit::Chars,
        }
    }
}

pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Build the context for `question` with explicit `k` and `budget`.
    pub async fn build(
        &self,
        index: &EmbeddingsIndex,
        question: &str,
        k: usize,
        budget: usize,
    ) -> Result<Vec<Passage>> {
        let results = index.search(question, k, None).await?;
        Ok(self.shape(results, budget))
    }

    /// Build with the configured defaults.
    pub async fn build_default(
        &self,
        index: &EmbeddingsIndex,
        question: &str,
    ) -> Result<Vec<Passage>> {
        self.build(index, question, self.config.k, self.config.max_budget)
            .await
    }

    /// Dedupe and trim an already-ranked passage list to the budget.
    pub fn shape(&self, ranked: Vec<Passage>, budget: usize) -> Vec<Passage> {
        let mut passages: Vec<Passage> = Vec::with_capacity(ranked.len());
        for passage in ranked {
            // Results arrive in descending score order, so the first copy of
            // a text is the highest-scored one.
            if passages.iter().any(|kept| kept.text == passage.text) {
                continue;
            }
            passages.push(passage);
        }

        let mut total: usize = passages.iter().map(|p| self.measure(&p.text)).sum();
        while total > budget {
            let Some(dropped) = passages.pop() else { break };
            total -= self.measure(&dropped.text);
            tracing::debug!(id = %dropped.id, "passage dropped to fit context budget");
        }

        passages
    }

    fn measure(&self, text: &str) -> usize {
        match self.config.unit {
            BudgetUnit::Chars => text.chars().count(),
            BudgetUnit::Tokens => text.split_whitespace().count(),
        }
    }
}
