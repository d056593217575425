//! Vector storage and similarity search.

pub mod math;
mod store;

pub use store::{SimilarityMetric, VectorStore, VectorStoreConfig};
