//! Sample Dataset
//!
//! Bounded, caller-supplied rows used only by the execution stage.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Integer(i) => write!(f, "{}", i),
            ScalarValue::Real(r) => write!(f, "{}", r),
            ScalarValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Integer(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Real(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Text(v.to_string())
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

pub type Row = BTreeMap<String, ScalarValue>;

/// Table name -> ordered rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleDataset {
    tables: BTreeMap<String, Vec<Row>>,
}

impl SampleDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// Append a row given as (column, value) pairs
    pub fn push_row<I, K, V>(&mut self, table: &str, row: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ScalarValue>,
    {
        let row: Row = row.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, rows)| rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[Row])> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_values() {
        let dataset = SampleDataset::from_json(
            r#"{"employees": [{"id": 1, "name": "Alice", "salary": 60000.5, "active": true, "dept_id": null}]}"#,
        )
        .unwrap();
        let row = &dataset.rows("EMPLOYEES")[0];
        assert_eq!(row["id"], ScalarValue::Integer(1));
        assert_eq!(row["name"], ScalarValue::Text("Alice".to_string()));
        assert_eq!(row["salary"], ScalarValue::Real(60000.5));
        assert_eq!(row["active"], ScalarValue::Bool(true));
        assert_eq!(row["dept_id"], ScalarValue::Null);
    }

    #[test]
    fn test_push_row() {
        let mut dataset = SampleDataset::new();
        dataset.push_row("t", [("a", ScalarValue::from(1i64)), ("b", ScalarValue::from("x"))]);
        dataset.push_row("t", [("a", 2i64)]);
        assert_eq!(dataset.rows("t").len(), 2);
        assert_eq!(dataset.total_rows(), 2);
        assert!(dataset.rows("missing").is_empty());
    }
}
