#![allow(dead_code)]

use sql_verifier::schema::ColumnPath;
use sql_verifier::{
    ColumnDef, ForeignKey, Orchestrator, SampleDataset, ScalarValue, SchemaModel, TableDef,
    VerifierConfig,
};

pub fn schema() -> SchemaModel {
    SchemaModel::new(
        vec![
            TableDef::new("employees")
                .with_column(ColumnDef::new("id", "INTEGER").not_null())
                .with_column(ColumnDef::new("name", "TEXT"))
                .with_column(ColumnDef::new("salary", "REAL"))
                .with_column(ColumnDef::new("dept_id", "INTEGER")),
            TableDef::new("departments")
                .with_column(ColumnDef::new("id", "INTEGER").not_null())
                .with_column(ColumnDef::new("name", "TEXT")),
        ],
        vec![ForeignKey {
            from: ColumnPath::new("employees", "dept_id"),
            to: ColumnPath::new("departments", "id"),
        }],
    )
    .expect("valid test schema")
}

pub fn dataset() -> SampleDataset {
    let mut dataset = SampleDataset::new();
    for (id, name, salary, dept) in [
        (1i64, "Alice", 60000.0, 1i64),
        (2, "Bob", 45000.0, 2),
        (3, "Charlie", 75000.0, 1),
    ] {
        dataset.push_row(
            "employees",
            [
                ("id", ScalarValue::from(id)),
                ("name", ScalarValue::from(name)),
                ("salary", ScalarValue::from(salary)),
                ("dept_id", ScalarValue::from(dept)),
            ],
        );
    }
    for (id, name) in [(1i64, "Engineering"), (2, "Sales")] {
        dataset.push_row(
            "departments",
            [("id", ScalarValue::from(id)), ("name", ScalarValue::from(name))],
        );
    }
    dataset
}

pub fn orchestrator(config: VerifierConfig) -> Orchestrator {
    Orchestrator::new(config).expect("valid config")
}
