//! Schema Model
//!
//! Table and column declarations plus foreign-key relationships. Lookups are
//! case-insensitive; declaration order is preserved because nearest-match
//! suggestions break ties by it.

pub mod dataset;

pub use dataset::*;

use crate::error::{Result, VerifierError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,

    /// Declared type tag, e.g. `INTEGER` or `VARCHAR(50)`
    #[serde(rename = "type", default = "default_type")]
    pub data_type: String,

    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_type() -> String {
    "TEXT".to_string()
}

fn default_nullable() -> bool {
    true
}

/// Coarse type family used for comparison checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeClass {
    Numeric,
    Text,
    Temporal,
    Other,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Classify the declared type tag, following SQLite's affinity rules
    pub fn type_class(&self) -> TypeClass {
        let tag = self.data_type.to_ascii_uppercase();
        if tag.contains("DATE") || tag.contains("TIME") {
            TypeClass::Temporal
        } else if tag.contains("CHAR") || tag.contains("CLOB") || tag.contains("TEXT") {
            TypeClass::Text
        } else if ["INT", "REAL", "FLOA", "DOUB", "NUMERIC", "DECIMAL", "BOOL"]
            .iter()
            .any(|t| tag.contains(t))
        {
            TypeClass::Numeric
        } else {
            TypeClass::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnPath {
    pub table: String,
    pub column: String,
}

impl ColumnPath {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    fn matches(&self, table: &str, column: &str) -> bool {
        self.table.eq_ignore_ascii_case(table) && self.column.eq_ignore_ascii_case(column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from: ColumnPath,
    pub to: ColumnPath,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawSchema {
    #[serde(default)]
    tables: Vec<TableDef>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKey>,
}

/// Read-only schema snapshot for one verification session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "RawSchema", into = "RawSchema")]
pub struct SchemaModel {
    tables: Vec<TableDef>,
    foreign_keys: Vec<ForeignKey>,
    index: HashMap<String, usize>,
}

impl SchemaModel {
    pub fn new(tables: Vec<TableDef>, foreign_keys: Vec<ForeignKey>) -> Result<Self> {
        let mut index = HashMap::new();
        for (idx, table) in tables.iter().enumerate() {
            if index.insert(table.name.to_lowercase(), idx).is_some() {
                return Err(VerifierError::Schema(format!(
                    "Duplicate table name (case-insensitive): {}",
                    table.name
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for column in &table.columns {
                if !seen.insert(column.name.to_lowercase()) {
                    return Err(VerifierError::Schema(format!(
                        "Duplicate column {}.{}",
                        table.name, column.name
                    )));
                }
            }
        }

        let schema = Self {
            tables,
            foreign_keys,
            index,
        };

        for fk in &schema.foreign_keys {
            for path in [&fk.from, &fk.to] {
                if schema.column(&path.table, &path.column).is_none() {
                    return Err(VerifierError::Schema(format!(
                        "Foreign key references unknown column {}.{}",
                        path.table, path.column
                    )));
                }
            }
        }

        Ok(schema)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// Tables in declaration order
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.index
            .get(&name.to_lowercase())
            .and_then(|idx| self.tables.get(*idx))
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnDef> {
        self.table(table).and_then(|t| t.column(column))
    }

    /// Declaration position of a table, used for deterministic tie-breaks
    pub fn position(&self, table: &str) -> Option<usize> {
        self.index.get(&table.to_lowercase()).copied()
    }

    /// True when a foreign key links the two columns in either direction
    pub fn has_foreign_key(&self, left: &ColumnPath, right: &ColumnPath) -> bool {
        self.foreign_keys.iter().any(|fk| {
            (fk.from.matches(&left.table, &left.column) && fk.to.matches(&right.table, &right.column))
                || (fk.from.matches(&right.table, &right.column)
                    && fk.to.matches(&left.table, &left.column))
        })
    }
}

impl TryFrom<RawSchema> for SchemaModel {
    type Error = VerifierError;

    fn try_from(raw: RawSchema) -> Result<Self> {
        SchemaModel::new(raw.tables, raw.foreign_keys)
    }
}

impl From<SchemaModel> for RawSchema {
    fn from(schema: SchemaModel) -> Self {
        RawSchema {
            tables: schema.tables,
            foreign_keys: schema.foreign_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> SchemaModel {
        SchemaModel::new(
            vec![
                TableDef::new("employees")
                    .with_column(ColumnDef::new("id", "INTEGER").not_null())
                    .with_column(ColumnDef::new("name", "TEXT"))
                    .with_column(ColumnDef::new("dept_id", "INTEGER")),
                TableDef::new("departments")
                    .with_column(ColumnDef::new("id", "INTEGER").not_null())
                    .with_column(ColumnDef::new("name", "VARCHAR(40)")),
            ],
            vec![ForeignKey {
                from: ColumnPath::new("employees", "dept_id"),
                to: ColumnPath::new("departments", "id"),
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let schema = sample_schema();
        assert!(schema.table("EMPLOYEES").is_some());
        assert!(schema.column("Employees", "DEPT_ID").is_some());
        assert_eq!(schema.position("departments"), Some(1));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let result = SchemaModel::new(vec![TableDef::new("a"), TableDef::new("A")], vec![]);
        assert!(matches!(result, Err(VerifierError::Schema(_))));
    }

    #[test]
    fn test_foreign_key_either_direction() {
        let schema = sample_schema();
        let e = ColumnPath::new("employees", "dept_id");
        let d = ColumnPath::new("Departments", "ID");
        assert!(schema.has_foreign_key(&e, &d));
        assert!(schema.has_foreign_key(&d, &e));
        assert!(!schema.has_foreign_key(&ColumnPath::new("employees", "id"), &d));
    }

    #[test]
    fn test_type_class() {
        assert_eq!(ColumnDef::new("a", "VARCHAR(40)").type_class(), TypeClass::Text);
        assert_eq!(ColumnDef::new("a", "bigint").type_class(), TypeClass::Numeric);
        assert_eq!(ColumnDef::new("a", "DATETIME").type_class(), TypeClass::Temporal);
        assert_eq!(ColumnDef::new("a", "BLOB").type_class(), TypeClass::Other);
    }

    #[test]
    fn test_json_format() {
        let schema = SchemaModel::from_json(
            r#"{
                "tables": [
                    {"name": "t", "columns": [{"name": "a", "type": "INTEGER", "nullable": false}, {"name": "b"}]}
                ],
                "foreign_keys": []
            }"#,
        )
        .unwrap();
        let b = schema.column("t", "b").unwrap();
        assert_eq!(b.data_type, "TEXT");
        assert!(b.nullable);
        assert!(!schema.column("t", "a").unwrap().nullable);
    }

    #[test]
    fn test_unknown_foreign_key_column_rejected() {
        let raw = r#"{"tables": [{"name": "t", "columns": [{"name": "a"}]}],
                      "foreign_keys": [{"from": {"table": "t", "column": "a"}, "to": {"table": "u", "column": "id"}}]}"#;
        assert!(SchemaModel::from_json(raw).is_err());
    }
}
