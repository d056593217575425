//! SQLite-backed index snapshots.
//!
//! One table holds row text, columns and the embedding blob side by side, so
//! a snapshot can never hold a row without its vector. Embeddings are stored
//! as little-endian f32 bytes; insertion order is preserved via an explicit
//! position column.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row as SqlRow, SqlitePool};

use crate::content::Row;
use crate::core::errors::{EngineError, Result};
use crate::vector::SimilarityMetric;

pub struct Snapshot {
    pool: SqlitePool,
}

impl Snapshot {
    /// Create (or overwrite) a snapshot file at `path`.
    pub async fn create(path: &Path) -> Result<Self> {
        let snapshot = Self::open_with(path, true).await?;
        snapshot.init_schema().await?;
        snapshot.clear().await?;
        Ok(snapshot)
    }

    /// Open an existing snapshot for reading.
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::NotFound(format!(
                "snapshot not found: {}",
                path.display()
            )));
        }
        Self::open_with(path, false).await
    }

    async fn open_with(path: &Path, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(EngineError::internal)?;

        Ok(Self { pool })
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                columns TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(EngineError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(EngineError::internal)?;

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await
            .map_err(EngineError::internal)?;
        sqlx::query("DELETE FROM meta")
            .execute(&self.pool)
            .await
            .map_err(EngineError::internal)?;
        Ok(())
    }

    /// Write the full index state.
    pub async fn write(
        &self,
        dimension: usize,
        metric: SimilarityMetric,
        entries: &[(Row, Vec<f32>)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(EngineError::internal)?;

        for (key, value) in [
            ("dimension", dimension.to_string()),
            ("metric", metric_name(metric).to_string()),
            ("saved_at", chrono::Utc::now().to_rfc3339()),
        ] {
            sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(EngineError::internal)?;
        }

        for (position, (row, embedding)) in entries.iter().enumerate() {
            let columns = serde_json::to_string(&row.columns).map_err(EngineError::internal)?;

            sqlx::query(
                "INSERT OR REPLACE INTO documents (id, position, text, columns, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&row.id)
            .bind(position as i64)
            .bind(&row.text)
            .bind(&columns)
            .bind(serialize_embedding(embedding))
            .execute(&mut *tx)
            .await
            .map_err(EngineError::internal)?;
        }

        tx.commit().await.map_err(EngineError::internal)?;
        Ok(())
    }

    /// Read the full index state back, in insertion order.
    pub async fn read(&self) -> Result<(usize, SimilarityMetric, Vec<(Row, Vec<f32>)>)> {
        let dimension: String = self.meta("dimension").await?;
        let dimension: usize = dimension
            .parse()
            .map_err(|_| EngineError::Consistency("corrupt snapshot dimension".to_string()))?;

        let metric = parse_metric(&self.meta("metric").await?)?;

        let rows = sqlx::query(
            "SELECT id, text, columns, embedding FROM documents ORDER BY position ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::internal)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let text: String = row.get("text");
            let columns: String = row.get("columns");
            let blob: Vec<u8> = row.get("embedding");

            let embedding = deserialize_embedding(&blob);
            if embedding.len() != dimension {
                return Err(EngineError::Consistency(format!(
                    "snapshot vector for {id} has dimension {}, expected {dimension}",
                    embedding.len()
                )));
            }

            entries.push((
                Row {
                    id,
                    text,
                    columns: serde_json::from_str(&columns).map_err(EngineError::internal)?,
                },
                embedding,
            ));
        }

        Ok((dimension, metric, entries))
    }

    async fn meta(&self, key: &str) -> Result<String> {
        sqlx::query_scalar("SELECT value FROM meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::internal)?
            .ok_or_else(|| EngineError::Consistency(format!("snapshot missing meta key {key}")))
    }
}

fn metric_name(metric: SimilarityMetric) -> &'static str {
    match metric {
        SimilarityMetric::Cosine => "cosine",
        SimilarityMetric::InnerProduct => "innerproduct",
    }
}

fn parse_metric(raw: &str) -> Result<SimilarityMetric> {
    match raw {
        "cosine" => Ok(SimilarityMetric::Cosine),
        "innerproduct" => Ok(SimilarityMetric::InnerProduct),
        other => Err(EngineError::Consistency(format!(
            "unknown snapshot metric: {other}"
        ))),
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_row(id: &str, text: &str) -> Row {
        Row {
            id: id.to_string(),
            text: text.to_string(),
            columns: [("lang".to_string(), json!("en"))].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn snapshot_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let entries = vec![
            (make_row("a", "cats are mammals"), vec![0.25f32, -1.5, 3.0]),
            (make_row("b", "dogs are mammals"), vec![0.5f32, 0.0, -0.125]),
        ];

        let snapshot = Snapshot::create(&path).await.unwrap();
        snapshot
            .write(3, SimilarityMetric::Cosine, &entries)
            .await
            .unwrap();

        let reopened = Snapshot::open(&path).await.unwrap();
        let (dimension, metric, restored) = reopened.read().await.unwrap();

        assert_eq!(dimension, 3);
        assert_eq!(metric, SimilarityMetric::Cosine);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].0.id, "a");
        assert_eq!(restored[0].1, entries[0].1);
        assert_eq!(restored[1].0.text, "dogs are mammals");
        assert_eq!(restored[1].0.columns, entries[1].0.columns);
    }

    #[tokio::test]
    async fn open_missing_snapshot_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Snapshot::open(&dir.path().join("absent.db"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn embedding_bytes_round_trip() {
        let original = vec![1.0f32, -2.5, 0.000123, f32::MAX];
        let bytes = serialize_embedding(&original);
        assert_eq!(deserialize_embedding(&bytes), original);
    }
}
