use async_trait::async_trait;

use crate::core::errors::Result;
use super::types::GenerateRequest;

/// Text embedding capability.
///
/// Implementations must be stable within a session: embedding the same text
/// twice yields the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Text generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logging (e.g. "http-local", "http-hosted").
    fn name(&self) -> &str;

    /// Run one completion. Callers bound this with their own timeout.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;
}
