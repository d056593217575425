//! Deterministic in-memory capabilities.
//!
//! The embedding and generation traits are normally backed by an HTTP
//! provider; these implementations return fixed outputs so ingestion,
//! retrieval and citation behavior can be exercised reproducibly.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::errors::{EngineError, Result};
use crate::llm::{Embedder, GenerateRequest, TextGenerator};

/// Embedder returning a fixed vector per known text.
///
/// Unknown texts embed to the zero vector, which scores 0 under cosine.
pub struct StaticEmbedder {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl StaticEmbedder {
    pub fn new<const N: usize>(dimension: usize, entries: &[(&str, [f32; N])]) -> Self {
        let vectors = entries
            .iter()
            .map(|(text, vector)| (text.to_string(), vector.to_vec()))
            .collect();
        Self {
            dimension,
            vectors,
            calls: AtomicUsize::new(0),
        }
    }

    /// Register another text → vector mapping.
    pub fn insert(&mut self, text: impl Into<String>, vector: Vec<f32>) {
        self.vectors.insert(text.into(), vector);
    }

    /// How many embed calls have been made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dimension])
            })
            .collect())
    }
}

/// Generator that replays a queue of canned outputs.
///
/// Optionally fails with transient errors before succeeding, to drive the
/// pipeline's retry path.
pub struct ScriptedGenerator {
    outputs: Mutex<VecDeque<String>>,
    transient_failures: AtomicUsize,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedGenerator {
    pub fn new(outputs: Vec<&str>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into_iter().map(str::to_string).collect()),
            transient_failures: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `count` generate calls with a transient error.
    pub fn fail_transiently(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Every request seen so far, for prompt assertions.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request);

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::transient("scripted transient failure"));
        }

        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::Backend("scripted generator exhausted".to_string()))
    }
}
