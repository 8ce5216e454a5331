//! Execution Verifier
//!
//! Runs a statement against the sample data through an `ExecutionBackend` and
//! turns the outcome into findings. Backend-side failures of the statement
//! become RUNTIME_ERROR findings; only infrastructure failures are returned
//! as errors.

pub mod backend;
pub mod error_classifier;
pub mod sqlite;

pub use backend::{ExecutionBackend, ExecutionOutcome, ExecutionRequest, QueryOutput};
pub use error_classifier::{ErrorClassifier, RuntimeErrorClass};
pub use sqlite::SqliteBackend;

use crate::config::VerifierConfig;
use crate::error::Result;
use crate::schema::{SampleDataset, SchemaModel};
use crate::stage::{ExecutionArtifacts, StageArtifacts, StageResult};
use crate::statement::SqlStatement;
use crate::taxonomy::{ErrorKind, Finding, RepairHint, Stage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ExecutionVerifier {
    backend: Arc<dyn ExecutionBackend>,
    classifier: ErrorClassifier,
    budget: Duration,
    slow_threshold: Duration,
    large_result_threshold: usize,
    dry_run: bool,
    sample_rows: usize,
}

impl ExecutionVerifier {
    pub fn new(backend: Arc<dyn ExecutionBackend>, config: &VerifierConfig) -> Self {
        Self {
            backend,
            classifier: ErrorClassifier::new(),
            budget: config.execution_timeout(),
            slow_threshold: config.slow_query_threshold(),
            large_result_threshold: config.large_result_threshold,
            dry_run: config.dry_run,
            sample_rows: config.sample_rows,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn verify(
        &self,
        statement: &SqlStatement,
        schema: &SchemaModel,
        dataset: Option<&SampleDataset>,
    ) -> Result<StageResult> {
        let request = ExecutionRequest {
            sql: statement.text(),
            schema,
            dataset,
            budget: self.budget,
            dry_run: self.dry_run,
            sample_rows: self.sample_rows,
        };

        debug!(
            "Executing on {} (budget {:?}, dry_run={})",
            self.backend.name(),
            self.budget,
            self.dry_run
        );
        let outcome = self.backend.execute(&request)?;

        let mut artifacts = ExecutionArtifacts {
            backend: self.backend.name().to_string(),
            columns: Vec::new(),
            row_count: 0,
            latency_ms: 0,
            sample_rows: Vec::new(),
            timed_out: false,
            dry_run: self.dry_run,
        };

        let findings = match outcome {
            ExecutionOutcome::TimedOut { elapsed } => {
                warn!("Statement exceeded the {:?} budget", self.budget);
                artifacts.timed_out = true;
                artifacts.latency_ms = millis(elapsed);
                vec![Finding::new(
                    ErrorKind::ExecutionTimeout,
                    format!(
                        "Execution exceeded the {} ms budget",
                        millis(self.budget)
                    ),
                )
                .with_hint(RepairHint::advice(
                    "Add a LIMIT or a terminating condition to the statement",
                ))]
            }
            ExecutionOutcome::Failed { message } => {
                let class = self.classifier.classify(&message);
                info!("Runtime error classified as {}: {}", class, message);
                let mut finding = Finding::new(
                    ErrorKind::RuntimeError,
                    format!("Runtime error ({}): {}", class, message),
                )
                .with_severity(class.severity())
                .with_hint(RepairHint::advice(class.suggestion()));
                if let Some(subject) = self.classifier.subject(&message) {
                    finding = finding.subject(subject);
                }
                vec![finding]
            }
            ExecutionOutcome::Completed(output) => {
                let findings = self.inspect(&output);
                artifacts.columns = output.columns;
                artifacts.row_count = output.row_count;
                artifacts.latency_ms = millis(output.latency);
                artifacts.sample_rows = output.sample_rows;
                findings
            }
        };

        Ok(StageResult::new(
            Stage::Execution,
            statement.clone(),
            findings,
            StageArtifacts::Execution(artifacts),
        ))
    }

    /// Result-shape and latency findings for a completed run
    fn inspect(&self, output: &QueryOutput) -> Vec<Finding> {
        let mut findings = Vec::new();
        let latency_ms = millis(output.latency);

        if self.dry_run {
            findings.push(Finding::new(
                ErrorKind::ExecutionStats,
                format!("Statement planned ({} plan steps)", output.row_count),
            ));
            return findings;
        }

        if output.row_count == 0 {
            findings.push(
                Finding::new(ErrorKind::EmptyResult, "Statement returned no rows")
                    .with_hint(RepairHint::advice(
                        "Check filter conditions against the sample data",
                    )),
            );
        } else if output.row_count > self.large_result_threshold {
            findings.push(
                Finding::new(
                    ErrorKind::ExcessiveResult,
                    format!(
                        "Statement returned {} rows (threshold {})",
                        output.row_count, self.large_result_threshold
                    ),
                )
                .with_hint(RepairHint::advice("Add a LIMIT or a more selective filter")),
            );
        }

        if output.latency > self.slow_threshold {
            findings.push(Finding::new(
                ErrorKind::SlowExecution,
                format!(
                    "Execution took {} ms (threshold {} ms)",
                    latency_ms,
                    millis(self.slow_threshold)
                ),
            ));
        }

        findings.push(Finding::new(
            ErrorKind::ExecutionStats,
            format!(
                "Returned {} row(s) with {} column(s)",
                output.row_count,
                output.columns.len()
            ),
        ));
        findings
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerifierError;
    use crate::schema::{ColumnDef, ScalarValue, TableDef};
    use crate::taxonomy::Severity;

    fn schema() -> SchemaModel {
        SchemaModel::new(
            vec![TableDef::new("employees")
                .with_column(ColumnDef::new("id", "INTEGER").not_null())
                .with_column(ColumnDef::new("name", "TEXT"))],
            vec![],
        )
        .unwrap()
    }

    fn dataset(rows: i64) -> SampleDataset {
        let mut dataset = SampleDataset::new();
        for id in 1..=rows {
            dataset.push_row(
                "employees",
                [("id", ScalarValue::from(id)), ("name", ScalarValue::from("x"))],
            );
        }
        dataset
    }

    fn verifier(config: &VerifierConfig) -> ExecutionVerifier {
        ExecutionVerifier::new(Arc::new(SqliteBackend::new()), config)
    }

    struct Unavailable;

    impl ExecutionBackend for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn execute(&self, _request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome> {
            Err(VerifierError::BackendUnavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn test_clean_run_reports_stats_only() {
        let result = verifier(&VerifierConfig::default())
            .verify(&SqlStatement::new("SELECT * FROM employees"), &schema(), Some(&dataset(3)))
            .unwrap();
        assert!(result.passed());
        assert_eq!(result.findings().len(), 1);
        assert_eq!(result.findings()[0].kind, ErrorKind::ExecutionStats);
        assert_eq!(result.findings()[0].severity, Severity::Info);
        assert_eq!(result.findings()[0].message, "Returned 3 row(s) with 2 column(s)");
        match result.artifacts() {
            StageArtifacts::Execution(a) => {
                assert_eq!(a.row_count, 3);
                assert_eq!(a.backend, "sqlite");
                assert_eq!(a.columns, vec!["id".to_string(), "name".to_string()]);
            }
            other => panic!("unexpected artifacts: {:?}", other),
        }
    }

    #[test]
    fn test_empty_and_excessive_results_warn() {
        let config = VerifierConfig {
            large_result_threshold: 2,
            ..Default::default()
        };
        let v = verifier(&config);
        let empty = v
            .verify(&SqlStatement::new("SELECT * FROM employees"), &schema(), None)
            .unwrap();
        assert!(empty.passed());
        assert_eq!(empty.count(ErrorKind::EmptyResult, None), 1);

        let large = v
            .verify(&SqlStatement::new("SELECT * FROM employees"), &schema(), Some(&dataset(5)))
            .unwrap();
        assert!(large.passed());
        assert_eq!(large.count(ErrorKind::ExcessiveResult, None), 1);
    }

    #[test]
    fn test_runtime_error_is_a_finding() {
        let result = verifier(&VerifierConfig::default())
            .verify(&SqlStatement::new("SELECT * FROM emplyees"), &schema(), None)
            .unwrap();
        assert!(!result.passed());
        let finding = &result.findings()[0];
        assert_eq!(finding.kind, ErrorKind::RuntimeError);
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.subject.as_deref(), Some("emplyees"));
    }

    #[test]
    fn test_timeout_is_critical() {
        let config = VerifierConfig {
            execution_timeout_ms: 100,
            ..Default::default()
        };
        let sql = "WITH RECURSIVE cnt(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM cnt) SELECT COUNT(*) FROM cnt";
        let result = verifier(&config)
            .verify(&SqlStatement::new(sql), &schema(), None)
            .unwrap();
        assert!(!result.passed());
        assert_eq!(result.count(ErrorKind::ExecutionTimeout, None), 1);
        assert!(matches!(result.artifacts(), StageArtifacts::Execution(a) if a.timed_out));
    }

    #[test]
    fn test_backend_unavailable_propagates() {
        let v = ExecutionVerifier::new(Arc::new(Unavailable), &VerifierConfig::default());
        let err = v
            .verify(&SqlStatement::new("SELECT 1"), &schema(), None)
            .unwrap_err();
        assert!(matches!(err, VerifierError::BackendUnavailable(_)));
    }

    #[test]
    fn test_dry_run_skips_result_checks() {
        let config = VerifierConfig {
            dry_run: true,
            ..Default::default()
        };
        let result = verifier(&config)
            .verify(&SqlStatement::new("SELECT * FROM employees"), &schema(), None)
            .unwrap();
        assert!(result.passed());
        assert_eq!(result.count(ErrorKind::EmptyResult, None), 0);
        assert_eq!(result.count(ErrorKind::ExecutionStats, None), 1);
    }
}
