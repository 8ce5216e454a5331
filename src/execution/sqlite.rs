//! SQLite execution backend
//!
//! Each call opens a fresh in-memory database, creates the schema, loads the
//! sample rows in one transaction and runs the statement under a watchdog that
//! interrupts the connection once the budget is spent. The database is dropped
//! when the call returns, so sessions never share state.
//!
//! Only a single read-only statement is executed. ATTACH is disabled through
//! the attached-database limit, so nothing outside the in-memory database can
//! be opened or written.

use super::backend::{ExecutionBackend, ExecutionOutcome, ExecutionRequest, QueryOutput};
use crate::error::{Result, VerifierError};
use crate::schema::{SampleDataset, ScalarValue, SchemaModel};
use crate::statement::SqlStatement;
use rusqlite::limits::Limit;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{ffi, params_from_iter, Connection, ErrorCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Instant;
use tracing::{debug, warn};

impl ToSql for ScalarValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ScalarValue::Null => ToSqlOutput::Owned(Value::Null),
            ScalarValue::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            ScalarValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            ScalarValue::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            ScalarValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct SqliteBackend;

impl SqliteBackend {
    pub fn new() -> Self {
        Self
    }

    fn open(&self, schema: &SchemaModel, dataset: Option<&SampleDataset>) -> Result<Connection> {
        let mut conn = Connection::open_in_memory().map_err(|e| {
            VerifierError::BackendUnavailable(format!("Failed to open in-memory database: {}", e))
        })?;

        for table in schema.tables() {
            if table.columns.is_empty() {
                return Err(VerifierError::Schema(format!(
                    "Table '{}' declares no columns",
                    table.name
                )));
            }
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    let mut def = format!("{} {}", quote_ident(&c.name), c.data_type);
                    if !c.nullable {
                        def.push_str(" NOT NULL");
                    }
                    def
                })
                .collect();
            let ddl = format!(
                "CREATE TABLE {} ({})",
                quote_ident(&table.name),
                columns.join(", ")
            );
            conn.execute(&ddl, []).map_err(|e| {
                VerifierError::BackendUnavailable(format!(
                    "Failed to create table '{}': {}",
                    table.name, e
                ))
            })?;
        }

        if let Some(dataset) = dataset {
            load_rows(&mut conn, schema, dataset)?;
        }

        conn.set_limit(Limit::SQLITE_LIMIT_ATTACHED, 0);
        Ok(conn)
    }
}

fn load_rows(conn: &mut Connection, schema: &SchemaModel, dataset: &SampleDataset) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| VerifierError::BackendUnavailable(format!("Failed to begin transaction: {}", e)))?;

    for (table_name, rows) in dataset.tables() {
        let table = schema.table(table_name).ok_or_else(|| {
            VerifierError::Dataset(format!("Sample rows reference unknown table '{}'", table_name))
        })?;

        for row in rows {
            if let Some(unknown) = row.keys().find(|k| table.column(k).is_none()) {
                return Err(VerifierError::Dataset(format!(
                    "Sample rows reference unknown column '{}.{}'",
                    table.name, unknown
                )));
            }

            let sql = if row.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&table.name))
            } else {
                let columns: Vec<String> = row.keys().map(|k| quote_ident(k)).collect();
                let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_ident(&table.name),
                    columns.join(", "),
                    placeholders.join(", ")
                )
            };

            tx.execute(&sql, params_from_iter(row.values())).map_err(|e| {
                VerifierError::Dataset(format!("Failed to load row into '{}': {}", table.name, e))
            })?;
        }
    }

    tx.commit()
        .map_err(|e| VerifierError::BackendUnavailable(format!("Failed to commit sample rows: {}", e)))?;
    debug!("Loaded {} sample rows", dataset.total_rows());
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn render(value: Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn refused(message: String) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_AUTH), Some(message))
}

/// Run the statement to completion, counting every row and keeping the first few
fn run_query(conn: &Connection, sql: &str, sample_rows: usize) -> rusqlite::Result<QueryOutput> {
    let start = Instant::now();
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(refused(
            "not authorized: only read-only statements can be executed".to_string(),
        ));
    }
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut row_count = 0usize;
    let mut samples = Vec::new();
    while let Some(row) = rows.next()? {
        if samples.len() < sample_rows {
            let mut rendered = Vec::with_capacity(width);
            for i in 0..width {
                rendered.push(render(row.get::<_, Value>(i)?));
            }
            samples.push(rendered);
        }
        row_count += 1;
    }

    Ok(QueryOutput {
        columns,
        row_count,
        sample_rows: samples,
        latency: start.elapsed(),
    })
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted)
}

impl ExecutionBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome> {
        // prepare() compiles only the first statement and ignores the rest
        let statement = SqlStatement::new(request.sql);
        if let Some(extra) = statement.trailing_statement() {
            return Ok(ExecutionOutcome::Failed {
                message: format!(
                    "not authorized: multiple statements (another starts at offset {})",
                    extra.offset
                ),
            });
        }
        let body = request.sql.get(..statement.body_end()).unwrap_or(request.sql);

        let conn = self.open(request.schema, request.dataset)?;
        let sql = if request.dry_run {
            format!("EXPLAIN QUERY PLAN {}", body)
        } else {
            body.to_string()
        };

        let interrupt = conn.get_interrupt_handle();
        let fired = AtomicBool::new(false);
        let budget = request.budget;
        let start = Instant::now();

        let result = std::thread::scope(|scope| {
            let (done_tx, done_rx) = mpsc::channel::<()>();
            let fired = &fired;
            scope.spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(budget) {
                    fired.store(true, Ordering::SeqCst);
                    interrupt.interrupt();
                }
            });
            let result = run_query(&conn, &sql, request.sample_rows);
            let _ = done_tx.send(());
            result
        });

        match result {
            Ok(output) => Ok(ExecutionOutcome::Completed(output)),
            Err(e) if fired.load(Ordering::SeqCst) || is_interrupt(&e) => {
                let elapsed = start.elapsed();
                warn!("Execution interrupted after {:?} (budget {:?})", elapsed, budget);
                Ok(ExecutionOutcome::TimedOut { elapsed })
            }
            Err(e) => Ok(ExecutionOutcome::Failed {
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, TableDef};
    use std::time::Duration;

    fn schema() -> SchemaModel {
        SchemaModel::new(
            vec![TableDef::new("employees")
                .with_column(ColumnDef::new("id", "INTEGER").not_null())
                .with_column(ColumnDef::new("name", "TEXT"))
                .with_column(ColumnDef::new("salary", "REAL"))],
            vec![],
        )
        .unwrap()
    }

    fn dataset() -> SampleDataset {
        let mut dataset = SampleDataset::new();
        for (id, name, salary) in [(1i64, "Alice", 60000.0), (2, "Bob", 45000.0)] {
            dataset.push_row(
                "employees",
                [
                    ("id", ScalarValue::from(id)),
                    ("name", ScalarValue::from(name)),
                    ("salary", ScalarValue::from(salary)),
                ],
            );
        }
        dataset
    }

    fn request<'a>(
        sql: &'a str,
        schema: &'a SchemaModel,
        dataset: Option<&'a SampleDataset>,
    ) -> ExecutionRequest<'a> {
        ExecutionRequest {
            sql,
            schema,
            dataset,
            budget: Duration::from_secs(5),
            dry_run: false,
            sample_rows: 5,
        }
    }

    #[test]
    fn test_completed_query() {
        let schema = schema();
        let dataset = dataset();
        let outcome = SqliteBackend::new()
            .execute(&request(
                "SELECT name FROM employees WHERE salary > 50000;",
                &schema,
                Some(&dataset),
            ))
            .unwrap();
        match outcome {
            ExecutionOutcome::Completed(output) => {
                assert_eq!(output.columns, vec!["name".to_string()]);
                assert_eq!(output.row_count, 1);
                assert_eq!(output.sample_rows, vec![vec!["Alice".to_string()]]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_empty_tables_without_dataset() {
        let schema = schema();
        let outcome = SqliteBackend::new()
            .execute(&request("SELECT * FROM employees", &schema, None))
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed(ref o) if o.row_count == 0 && o.columns.len() == 3));
    }

    #[test]
    fn test_failed_statement_is_an_outcome() {
        let schema = schema();
        let outcome = SqliteBackend::new()
            .execute(&request("SELECT nme FROM employees", &schema, None))
            .unwrap();
        match outcome {
            ExecutionOutcome::Failed { message } => assert!(message.contains("no such column")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_runaway_statement_times_out() {
        let schema = schema();
        let mut req = request(
            "WITH RECURSIVE cnt(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM cnt) SELECT COUNT(*) FROM cnt",
            &schema,
            None,
        );
        req.budget = Duration::from_millis(100);
        let outcome = SqliteBackend::new().execute(&req).unwrap();
        assert!(matches!(outcome, ExecutionOutcome::TimedOut { .. }));
    }

    #[test]
    fn test_dry_run_plans_only() {
        let schema = schema();
        let mut req = request("SELECT * FROM employees", &schema, None);
        req.dry_run = true;
        let outcome = SqliteBackend::new().execute(&req).unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    }

    #[test]
    fn test_writes_are_refused() {
        let schema = schema();
        let dataset = dataset();
        for sql in [
            "DELETE FROM employees",
            "CREATE TABLE extra (x INTEGER)",
            "VACUUM",
        ] {
            let outcome = SqliteBackend::new()
                .execute(&request(sql, &schema, Some(&dataset)))
                .unwrap();
            match outcome {
                ExecutionOutcome::Failed { message } => {
                    assert!(message.contains("not authorized"), "{}: {}", sql, message)
                }
                other => panic!("{} ran: {:?}", sql, other),
            }
        }
    }

    #[test]
    fn test_attach_is_refused() {
        let schema = schema();
        let outcome = SqliteBackend::new()
            .execute(&request("ATTACH DATABASE ':memory:' AS other", &schema, None))
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
    }

    #[test]
    fn test_second_statement_is_refused() {
        let schema = schema();
        let outcome = SqliteBackend::new()
            .execute(&request("SELECT 1; DROP TABLE employees", &schema, None))
            .unwrap();
        match outcome {
            ExecutionOutcome::Failed { message } => {
                assert!(message.contains("multiple statements"));
                assert!(message.contains("offset 10"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_dataset_with_unknown_column_is_rejected() {
        let schema = schema();
        let mut dataset = SampleDataset::new();
        dataset.push_row("employees", [("id", ScalarValue::from(1i64)), ("bonus", ScalarValue::from(5i64))]);
        let err = SqliteBackend::new()
            .execute(&request("SELECT 1", &schema, Some(&dataset)))
            .unwrap_err();
        assert!(matches!(err, VerifierError::Dataset(_)));
    }

    #[test]
    fn test_not_null_violation_is_a_dataset_error() {
        let schema = schema();
        let mut dataset = SampleDataset::new();
        dataset.push_row("employees", [("name", "Nobody")]);
        let err = SqliteBackend::new()
            .execute(&request("SELECT 1", &schema, Some(&dataset)))
            .unwrap_err();
        assert!(matches!(err, VerifierError::Dataset(_)));
    }
}
