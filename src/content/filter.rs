//! Closed predicate grammar for row filtering.
//!
//! Filters are data, not code: equality and numeric range comparisons over
//! named columns, composable with `And`/`Or`. The pseudo-column `id` refers
//! to the row id itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Row;

/// Name of the pseudo-column that matches against the row id.
pub const ID_COLUMN: &str = "id";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// Column equals the given JSON value. On `id`, compares the row id.
    Eq(String, Value),
    /// Numeric comparisons. Rows without a numeric value in the column
    /// simply do not match.
    Gt(String, f64),
    Ge(String, f64),
    Lt(String, f64),
    Le(String, f64),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: f64) -> Self {
        Filter::Gt(column.into(), value)
    }

    pub fn ge(column: impl Into<String>, value: f64) -> Self {
        Filter::Ge(column.into(), value)
    }

    pub fn lt(column: impl Into<String>, value: f64) -> Self {
        Filter::Lt(column.into(), value)
    }

    pub fn le(column: impl Into<String>, value: f64) -> Self {
        Filter::Le(column.into(), value)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Every column name this filter references, including nested ones.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::Eq(col, _)
            | Filter::Gt(col, _)
            | Filter::Ge(col, _)
            | Filter::Lt(col, _)
            | Filter::Le(col, _) => out.push(col),
            Filter::And(inner) | Filter::Or(inner) => {
                for f in inner {
                    f.collect_columns(out);
                }
            }
        }
    }

    /// Evaluate against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq(col, value) => {
                if col == ID_COLUMN {
                    value.as_str() == Some(row.id.as_str())
                } else {
                    row.columns.get(col) == Some(value)
                }
            }
            Filter::Gt(col, bound) => Self::numeric(row, col).is_some_and(|v| v > *bound),
            Filter::Ge(col, bound) => Self::numeric(row, col).is_some_and(|v| v >= *bound),
            Filter::Lt(col, bound) => Self::numeric(row, col).is_some_and(|v| v < *bound),
            Filter::Le(col, bound) => Self::numeric(row, col).is_some_and(|v| v <= *bound),
            Filter::And(inner) => inner.iter().all(|f| f.matches(row)),
            Filter::Or(inner) => inner.iter().any(|f| f.matches(row)),
        }
    }

    fn numeric(row: &Row, col: &str) -> Option<f64> {
        row.columns.get(col).and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, columns: &[(&str, Value)]) -> Row {
        Row {
            id: id.to_string(),
            text: String::new(),
            columns: columns
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn equality_on_column_and_id() {
        let r = row("r1", &[("lang", json!("en"))]);

        assert!(Filter::eq("lang", "en").matches(&r));
        assert!(!Filter::eq("lang", "de").matches(&r));
        assert!(Filter::eq(ID_COLUMN, "r1").matches(&r));
        assert!(!Filter::eq(ID_COLUMN, "r2").matches(&r));
    }

    #[test]
    fn range_skips_non_numeric_values() {
        let r = row("r1", &[("year", json!(2019)), ("lang", json!("en"))]);

        assert!(Filter::gt("year", 2018.0).matches(&r));
        assert!(!Filter::gt("year", 2019.0).matches(&r));
        assert!(Filter::ge("year", 2019.0).matches(&r));
        assert!(!Filter::lt("lang", 5.0).matches(&r));
    }

    #[test]
    fn and_or_compose() {
        let r = row("r1", &[("year", json!(2019)), ("lang", json!("en"))]);

        let both = Filter::and(vec![Filter::eq("lang", "en"), Filter::ge("year", 2019.0)]);
        assert!(both.matches(&r));

        let either = Filter::or(vec![Filter::eq("lang", "de"), Filter::lt("year", 2020.0)]);
        assert!(either.matches(&r));

        let neither = Filter::and(vec![Filter::eq("lang", "de"), Filter::lt("year", 2020.0)]);
        assert!(!neither.matches(&r));
    }

    #[test]
    fn columns_lists_nested_references() {
        let filter = Filter::and(vec![
            Filter::eq("lang", "en"),
            Filter::or(vec![Filter::gt("year", 2000.0), Filter::eq(ID_COLUMN, "r1")]),
        ]);

        let mut cols = filter.columns();
        cols.sort_unstable();
        assert_eq!(cols, vec!["id", "lang", "year"]);
    }
}
