//! Dense vector store with tombstone deletion.
//!
//! Vectors live in one flat slot-major buffer scored in a single
//! matrix-vector pass. Removals tombstone their slot; the buffer is
//! compacted once tombstones exceed a configured fraction of live entries.

use std::collections::{HashMap, HashSet};

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::core::errors::{EngineError, Result};
use super::math;

/// Similarity metric, fixed at store construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    Cosine,
    InnerProduct,
}

impl Default for SimilarityMetric {
    fn default() -> Self {
        SimilarityMetric::Cosine
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Dimension of every stored vector. Invariant for the life of the store.
    pub dimension: usize,
    #[serde(default)]
    pub metric: SimilarityMetric,
    /// Compact once `tombstones > ratio * live`.
    pub max_tombstone_ratio: f32,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            metric: SimilarityMetric::Cosine,
            max_tombstone_ratio: 0.5,
        }
    }
}

struct Slot {
    id: Option<String>,
    seq: u64,
    norm: f32,
}

pub struct VectorStore {
    config: VectorStoreConfig,
    buf: Vec<f32>,
    slots: Vec<Slot>,
    id_to_slot: HashMap<String, usize>,
    tombstones: usize,
    next_seq: u64,
}

impl VectorStore {
    pub fn new(config: VectorStoreConfig) -> Self {
        Self {
            config,
            buf: Vec::new(),
            slots: Vec::new(),
            id_to_slot: HashMap::new(),
            tombstones: 0,
            next_seq: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.config.metric
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_slot.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.id_to_slot.contains_key(id)
    }

    /// Insert or replace the vector for `id`. A replacement is visible to
    /// queries before this call returns.
    pub fn add(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;

        let norm = math::l2_norm(vector);
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(&slot) = self.id_to_slot.get(id) {
            let start = slot * self.config.dimension;
            self.buf[start..start + self.config.dimension].copy_from_slice(vector);
            self.slots[slot].seq = seq;
            self.slots[slot].norm = norm;
            return Ok(());
        }

        self.buf.extend_from_slice(vector);
        self.slots.push(Slot {
            id: Some(id.to_string()),
            seq,
            norm,
        });
        self.id_to_slot.insert(id.to_string(), self.slots.len() - 1);
        Ok(())
    }

    /// Remove the vector for `id`. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(slot) = self.id_to_slot.remove(id) else {
            return false;
        };

        self.slots[slot].id = None;
        self.tombstones += 1;
        self.maybe_compact();
        true
    }

    /// Top-`k` live vectors by similarity, descending, ties broken by
    /// insertion order. An empty store yields an empty list.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        self.check_dimension(vector)?;

        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let view = ArrayView2::from_shape((self.slots.len(), self.config.dimension), &self.buf)
            .map_err(EngineError::internal)?;
        let dots = view.dot(&ndarray::ArrayView1::from(vector));
        let query_norm = math::l2_norm(vector);

        let mut scored: Vec<(&Slot, f32)> = self
            .slots
            .iter()
            .zip(dots.iter())
            .filter(|(slot, _)| slot.id.is_some())
            .map(|(slot, &dot)| (slot, self.finish_score(dot, slot.norm, query_norm)))
            .collect();

        Self::sort_descending(&mut scored);

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(slot, score)| (slot.id.clone().unwrap_or_default(), score))
            .collect())
    }

    /// Like [`query`](Self::query), but scores only the given candidate ids.
    /// Unknown ids are ignored.
    pub fn query_among(
        &self,
        vector: &[f32],
        candidates: &HashSet<String>,
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        self.check_dimension(vector)?;

        if candidates.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = math::l2_norm(vector);
        let mut scored = Vec::with_capacity(candidates.len());

        for id in candidates {
            let Some(&slot) = self.id_to_slot.get(id) else {
                continue;
            };
            let dot = math::dot(self.slot_vector(slot), vector)?;
            scored.push((&self.slots[slot], self.finish_score(dot, self.slots[slot].norm, query_norm)));
        }

        Self::sort_descending(&mut scored);

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(slot, score)| (slot.id.clone().unwrap_or_default(), score))
            .collect())
    }

    /// Raw stored vector for `id`.
    pub fn vector(&self, id: &str) -> Option<&[f32]> {
        self.id_to_slot.get(id).map(|&slot| self.slot_vector(slot))
    }

    /// Live `(id, vector)` pairs in insertion order, for persistence.
    pub fn entries(&self) -> Vec<(String, Vec<f32>)> {
        let mut live: Vec<(u64, &Slot, usize)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.id.is_some())
            .map(|(idx, slot)| (slot.seq, slot, idx))
            .collect();
        live.sort_by_key(|(seq, _, _)| *seq);

        live.into_iter()
            .map(|(_, slot, idx)| {
                (
                    slot.id.clone().unwrap_or_default(),
                    self.slot_vector(idx).to_vec(),
                )
            })
            .collect()
    }

    fn slot_vector(&self, slot: usize) -> &[f32] {
        let start = slot * self.config.dimension;
        &self.buf[start..start + self.config.dimension]
    }

    fn finish_score(&self, dot: f32, stored_norm: f32, query_norm: f32) -> f32 {
        match self.config.metric {
            SimilarityMetric::InnerProduct => dot,
            SimilarityMetric::Cosine => {
                let denom = stored_norm * query_norm;
                if denom <= f32::EPSILON {
                    0.0
                } else {
                    (dot / denom).clamp(-1.0, 1.0)
                }
            }
        }
    }

    fn sort_descending(scored: &mut [(&Slot, f32)]) {
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.seq.cmp(&b.0.seq))
        });
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(EngineError::Validation(format!(
                "vector dimension mismatch: got {}, store holds {}",
                vector.len(),
                self.config.dimension
            )));
        }
        Ok(())
    }

    fn maybe_compact(&mut self) {
        let live = self.id_to_slot.len();
        if self.tombstones == 0
            || (self.tombstones as f32) <= self.config.max_tombstone_ratio * (live.max(1) as f32)
        {
            return;
        }

        tracing::debug!(
            tombstones = self.tombstones,
            live,
            "compacting vector store"
        );

        let dimension = self.config.dimension;
        let mut buf = Vec::with_capacity(live * dimension);
        let mut slots = Vec::with_capacity(live);
        let mut id_to_slot = HashMap::with_capacity(live);

        for (idx, slot) in self.slots.iter().enumerate() {
            let Some(id) = &slot.id else { continue };
            let start = idx * dimension;
            buf.extend_from_slice(&self.buf[start..start + dimension]);
            id_to_slot.insert(id.clone(), slots.len());
            slots.push(Slot {
                id: Some(id.clone()),
                seq: slot.seq,
                norm: slot.norm,
            });
        }

        self.buf = buf;
        self.slots = slots;
        self.id_to_slot = id_to_slot;
        self.tombstones = 0;
    }
}
