//! Retrieval-augmented generation.
//!
//! This module turns a question into an answer with provenance:
//! - `ContextBuilder`: ranked, deduplicated, budget-bounded passages
//! - `RagPipeline`: prompt assembly, generation, postprocessing
//! - `CitationResolver`: maps the answer back to a context passage id

pub mod citation;
pub mod context_builder;
pub mod pipeline;
pub mod prompt;

pub use citation::{CitationConfig, CitationResolver, CitationStrategy};
pub use context_builder::{BudgetUnit, ContextBuilder, ContextConfig, Passage};
pub use pipeline::{
    Answer, OutputMode, PipelineConfig, RagMessage, RagOptions, RagPipeline, RagRequest,
};
pub use prompt::{PromptMode, PromptTemplate};
