//! Row metadata storage.
//!
//! Holds the text and named columns for every indexed id, queryable by id or
//! by a [`Filter`] predicate. Write ordering is defined by caller invocation
//! order; last write wins.

mod filter;

pub use filter::{Filter, ID_COLUMN};

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{EngineError, Result};

/// One stored document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    /// Unique, immutable once created.
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }
}

#[derive(Default)]
pub struct ContentStore {
    rows: HashMap<String, Row>,
    /// First-insert order; replacements keep their position.
    order: Vec<String>,
    /// Every column name ever written, for filter validation.
    known_columns: HashSet<String>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row. Idempotent on id, last write wins.
    pub fn put(&mut self, row: Row) {
        for name in row.columns.keys() {
            self.known_columns.insert(name.clone());
        }
        if !self.rows.contains_key(&row.id) {
            self.order.push(row.id.clone());
        }
        self.rows.insert(row.id.clone(), row);
    }

    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.get(id)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        if self.rows.remove(id).is_some() {
            self.order.retain(|existing| existing != id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows matching `filter`, lazily, in insertion order.
    ///
    /// Referencing a column no row has ever carried (other than `id`) is a
    /// validation error, surfaced before any row is produced.
    pub fn find<'a>(&'a self, filter: &'a Filter) -> Result<impl Iterator<Item = &'a Row> + 'a> {
        for column in filter.columns() {
            if column != ID_COLUMN && !self.known_columns.contains(column) {
                return Err(EngineError::Validation(format!(
                    "unknown filter column: {column}"
                )));
            }
        }

        Ok(self
            .order
            .iter()
            .filter_map(|id| self.rows.get(id))
            .filter(|row| filter.matches(row)))
    }

    /// All rows in insertion order, for persistence.
    pub fn rows(&self) -> impl Iterator<Item = &Row> + '_ {
        self.order.iter().filter_map(|id| self.rows.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_rows() -> ContentStore {
        let mut store = ContentStore::new();
        store.put(
            Row::new("r1", "cats are mammals")
                .with_column("lang", "en")
                .with_column("year", 2019),
        );
        store.put(
            Row::new("r2", "dogs are mammals")
                .with_column("lang", "en")
                .with_column("year", 2021),
        );
        store.put(Row::new("r3", "rockets use fuel").with_column("lang", "de"));
        store
    }

    #[test]
    fn put_is_idempotent_last_write_wins() {
        let mut store = ContentStore::new();
        store.put(Row::new("r1", "first"));
        store.put(Row::new("r1", "second"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("r1").unwrap().text, "second");
    }

    #[test]
    fn get_missing_is_none() {
        let store = ContentStore::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn find_filters_in_insertion_order() {
        let store = store_with_rows();
        let filter = Filter::eq("lang", "en");

        let ids: Vec<&str> = store
            .find(&filter)
            .unwrap()
            .map(|row| row.id.as_str())
            .collect();
        assert_eq!(ids, vec!["r1", "r2"]);
    }

    #[test]
    fn find_by_id_pseudo_column() {
        let store = store_with_rows();
        let filter = Filter::eq(ID_COLUMN, "r3");

        let rows: Vec<&Row> = store.find(&filter).unwrap().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "rockets use fuel");
    }

    #[test]
    fn find_unknown_column_is_a_validation_error() {
        let store = store_with_rows();
        let filter = Filter::eq("publisher", json!("acme"));

        let err = store.find(&filter).err().unwrap();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn find_range_over_year() {
        let store = store_with_rows();
        let filter = Filter::ge("year", 2020.0);

        let ids: Vec<&str> = store
            .find(&filter)
            .unwrap()
            .map(|row| row.id.as_str())
            .collect();
        assert_eq!(ids, vec!["r2"]);
    }

    #[test]
    fn remove_drops_row_and_order() {
        let mut store = store_with_rows();
        assert!(store.remove("r2"));
        assert!(!store.remove("r2"));

        let ids: Vec<&str> = store.rows().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r3"]);
    }
}
