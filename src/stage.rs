//! Stage Result
//!
//! Immutable outcome of one verifier stage. Fields are private so a result
//! cannot be altered after the stage produced it.

use crate::statement::SqlStatement;
use crate::taxonomy::{ErrorKind, Finding, Severity, Stage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Table reference resolved against the schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBinding {
    /// Name as written in the statement
    pub reference: String,
    pub table: String,
    pub alias: Option<String>,
    pub offset: usize,
}

/// Column reference resolved to `table.column`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBinding {
    pub reference: String,
    pub table: String,
    pub column: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionArtifacts {
    pub backend: String,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub latency_ms: u64,
    /// First rows of the result, rendered as text
    pub sample_rows: Vec<Vec<String>>,
    pub timed_out: bool,
    pub dry_run: bool,
}

impl ExecutionArtifacts {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum StageArtifacts {
    Grammar {
        /// Canonical formatting; absent when the structure is broken
        formatted: Option<String>,
    },
    Schema {
        tables: Vec<TableBinding>,
        columns: Vec<ColumnBinding>,
    },
    Execution(ExecutionArtifacts),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    stage: Stage,
    passed: bool,
    statement: SqlStatement,
    findings: Vec<Finding>,
    artifacts: StageArtifacts,
}

impl StageResult {
    /// Passed iff no finding is CRITICAL or ERROR
    pub fn new(
        stage: Stage,
        statement: SqlStatement,
        findings: Vec<Finding>,
        artifacts: StageArtifacts,
    ) -> Self {
        let passed = !findings.iter().any(Finding::is_failing);
        Self {
            stage,
            passed,
            statement,
            findings,
            artifacts,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn statement(&self) -> &SqlStatement {
        &self.statement
    }

    /// Findings in detection order
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn artifacts(&self) -> &StageArtifacts {
        &self.artifacts
    }

    pub fn has_critical(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Critical)
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// Number of findings of `kind` about `subject`
    pub fn count(&self, kind: ErrorKind, subject: Option<&str>) -> usize {
        self.findings
            .iter()
            .filter(|f| f.kind == kind && f.subject.as_deref() == subject)
            .count()
    }
}
