//! corpora — embeddings index, retrieval and citation engine.
//!
//! # Architecture
//!
//! ```text
//! Document -> Embedder -> EmbeddingsIndex (VectorStore + ContentStore)
//!                              |
//! Question -> ContextBuilder --+--> RagPipeline -> TextGenerator
//!                                       |
//!                                 CitationResolver -> Answer { text, reference }
//! ```
//!
//! The index owns all shared state behind a single-writer/multi-reader lock;
//! everything downstream is a stateless transformation. Embedding and
//! generation are capabilities supplied by the caller, typically the
//! OpenAI-compatible [`llm::HttpProvider`].

pub mod content;
pub mod core;
pub mod index;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod testing;
pub mod vector;

pub use crate::content::{Filter, Row};
pub use crate::core::config::Settings;
pub use crate::core::errors::{EngineError, Result};
pub use crate::index::{Document, EmbeddingsIndex, SearchResult};
pub use crate::llm::{Embedder, TextGenerator};
pub use crate::rag::{Answer, OutputMode, RagOptions, RagPipeline, RagRequest};
pub use crate::vector::{SimilarityMetric, VectorStoreConfig};
