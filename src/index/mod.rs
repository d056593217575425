//! Embeddings index: vector store + content store behind one lock.
//!
//! Writers (`index`, `delete`) are serialized; readers run concurrently and
//! observe either the pre- or post-state of any in-flight write, at the
//! granularity of one ingested item. A detected row/vector mismatch poisons
//! the index: reads keep working, further writes are refused.

mod snapshot;

pub use snapshot::Snapshot;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::content::{ContentStore, Filter, Row};
use crate::core::errors::{EngineError, Result};
use crate::llm::Embedder;
use crate::vector::{VectorStore, VectorStoreConfig};

/// How many texts go to the embedder per call, and how many such calls run
/// concurrently during bulk ingest.
const EMBED_BATCH: usize = 32;
const EMBED_CONCURRENCY: usize = 4;

/// One document to ingest. Without an id, the index assigns a UUID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub columns: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }
}

/// One search hit. Results are ordered descending by score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub score: f32,
}

struct IndexState {
    vectors: VectorStore,
    content: ContentStore,
}

pub struct EmbeddingsIndex {
    state: RwLock<IndexState>,
    /// Serializes bulk writers; readers only take `state`.
    writer: Mutex<()>,
    embedder: Arc<dyn Embedder>,
    poisoned: AtomicBool,
}

impl EmbeddingsIndex {
    /// Create an empty index. The configured dimension must match the
    /// embedder's output dimension.
    pub fn new(embedder: Arc<dyn Embedder>, config: VectorStoreConfig) -> Result<Self> {
        if config.dimension != embedder.dimension() {
            return Err(EngineError::Validation(format!(
                "store dimension {} does not match embedder dimension {}",
                config.dimension,
                embedder.dimension()
            )));
        }

        Ok(Self {
            state: RwLock::new(IndexState {
                vectors: VectorStore::new(config),
                content: ContentStore::new(),
            }),
            writer: Mutex::new(()),
            embedder,
            poisoned: AtomicBool::new(false),
        })
    }

    /// Ingest a batch of documents. Returns the assigned ids, in input order.
    ///
    /// Embeddings are computed outside the state lock; each item's row and
    /// vector are then applied together under one write-lock section, so a
    /// failure mid-batch leaves earlier items fully applied and later items
    /// untouched. Re-running the same batch is idempotent on id.
    pub async fn index(&self, documents: Vec<Document>) -> Result<Vec<String>> {
        self.check_writable()?;
        let _writer = self.writer.lock().await;

        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = documents.iter().map(|doc| doc.text.clone()).collect();
        let embeddings = self.embed_all(&texts).await?;

        let mut ids = Vec::with_capacity(documents.len());
        for (doc, vector) in documents.into_iter().zip(embeddings) {
            let id = doc
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            {
                let mut state = self.state.write().await;
                state.vectors.add(&id, &vector)?;
                state.content.put(Row {
                    id: id.clone(),
                    text: doc.text,
                    columns: doc.columns,
                });
            }

            ids.push(id);
        }

        tracing::debug!(count = ids.len(), "indexed documents");
        Ok(ids)
    }

    /// Number of live rows.
    pub async fn count(&self) -> usize {
        self.state.read().await.content.len()
    }

    /// Search by text. With a filter, candidates are narrowed through the
    /// content store first and only those ids are scored, so the filter
    /// cannot silently shrink the result set below `k`.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let vector = self.embed_query(query).await?;
        let state = self.state.read().await;

        let hits = match filter {
            Some(filter) => {
                let candidates: HashSet<String> = state
                    .content
                    .find(filter)?
                    .map(|row| row.id.clone())
                    .collect();
                state.vectors.query_among(&vector, &candidates, k)?
            }
            None => state.vectors.query(&vector, k)?,
        };

        let mut results = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            let Some(row) = state.content.get(&id) else {
                drop(state);
                return Err(self.poison(&id));
            };
            results.push(SearchResult {
                id,
                text: row.text.clone(),
                score,
            });
        }

        Ok(results)
    }

    /// Delete rows by id. Returns how many were removed; unknown ids are
    /// ignored.
    pub async fn delete(&self, ids: &[String]) -> Result<usize> {
        self.check_writable()?;
        let _writer = self.writer.lock().await;

        let mut state = self.state.write().await;
        let mut removed = 0;
        for id in ids {
            let had_vector = state.vectors.remove(id);
            let had_row = state.content.remove(id);

            if had_vector != had_row {
                drop(state);
                return Err(self.poison(id));
            }
            if had_row {
                removed += 1;
            }
        }

        tracing::debug!(removed, "deleted documents");
        Ok(removed)
    }

    /// Stored row for `id`, if live.
    pub async fn row(&self, id: &str) -> Option<Row> {
        self.state.read().await.content.get(id).cloned()
    }

    /// Stored vector for `id`, if live.
    pub async fn vector(&self, id: &str) -> Option<Vec<f32>> {
        self.state
            .read()
            .await
            .vectors
            .vector(id)
            .map(<[f32]>::to_vec)
    }

    /// Embed a query text through the index's embedder.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EngineError::Validation("empty query text".to_string()));
        }
        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EngineError::Backend("embedder returned no vector".to_string()))
    }

    /// Embed several texts through the index's embedder.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_all(texts).await
    }

    /// Closest id to `vector` among `candidates` only. Used for citation
    /// resolution, which must never look outside the supplied context.
    pub async fn nearest_among(
        &self,
        vector: &[f32],
        candidates: &HashSet<String>,
    ) -> Result<Option<(String, f32)>> {
        let state = self.state.read().await;
        let mut hits = state.vectors.query_among(vector, candidates, 1)?;
        Ok(hits.pop())
    }

    /// Whether a consistency failure has disabled writes.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Persist the full index state to a SQLite snapshot at `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let state = self.state.read().await;
        let snapshot = Snapshot::create(path).await?;

        let entries: Vec<(Row, Vec<f32>)> = state
            .vectors
            .entries()
            .into_iter()
            .map(|(id, vector)| {
                let row = state
                    .content
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| EngineError::Consistency(format!("vector without row: {id}")))?;
                Ok((row, vector))
            })
            .collect::<Result<_>>()?;

        snapshot
            .write(state.vectors.dimension(), state.vectors.metric(), &entries)
            .await?;

        tracing::info!(rows = entries.len(), path = %path.display(), "saved snapshot");
        Ok(())
    }

    /// Restore an index from a snapshot written by [`save`](Self::save).
    pub async fn restore(embedder: Arc<dyn Embedder>, path: &Path) -> Result<Self> {
        let snapshot = Snapshot::open(path).await?;
        let (dimension, metric, entries) = snapshot.read().await?;

        let index = Self::new(
            embedder,
            VectorStoreConfig {
                dimension,
                metric,
                ..Default::default()
            },
        )?;

        {
            let mut state = index.state.write().await;
            for (row, vector) in entries {
                state.vectors.add(&row.id, &vector)?;
                state.content.put(row);
            }
        }

        tracing::info!(path = %path.display(), "restored snapshot");
        Ok(index)
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batches: Vec<Vec<String>> = texts
            .chunks(EMBED_BATCH)
            .map(<[String]>::to_vec)
            .collect();

        let mut stream = futures_util::stream::iter(batches.into_iter().map(|batch| {
            let embedder = Arc::clone(&self.embedder);
            async move { embedder.embed(&batch).await }
        }))
        .buffered(EMBED_CONCURRENCY);

        let mut embeddings = Vec::with_capacity(texts.len());
        while let Some(batch) = stream.next().await {
            embeddings.extend(batch?);
        }

        if embeddings.len() != texts.len() {
            return Err(EngineError::Backend(format!(
                "embedder returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_poisoned() {
            return Err(EngineError::Consistency(
                "index is poisoned after a row/vector mismatch; writes are disabled".to_string(),
            ));
        }
        Ok(())
    }

    fn poison(&self, id: &str) -> EngineError {
        self.poisoned.store(true, Ordering::SeqCst);
        tracing::error!(id, "row/vector mapping broken, poisoning index");
        EngineError::Consistency(format!("row/vector mapping broken for id {id}"))
    }
}
