//! Verification Report
//!
//! Final outcome of one session plus the human-readable rendering.

use crate::error::Result;
use crate::repair::{Decline, Transformation};
use crate::stage::{StageArtifacts, StageResult};
use crate::statement::SqlStatement;
use crate::taxonomy::{Finding, Stage};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairAttempt {
    /// 1-based, strictly increasing within a session
    pub attempt: u32,
    pub finding: Finding,
    pub transformation: Transformation,
    pub statement: SqlStatement,
    /// The targeted concern was no longer reported on the next pass
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclinedRepair {
    pub finding: Finding,
    pub reason: Decline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub original: SqlStatement,
    pub grammar: StageResult,
    /// Absent when a critical grammar finding stopped the pass
    pub schema: Option<StageResult>,
    pub execution: Option<StageResult>,
    pub passed: bool,
    /// Last statement that was actually verified
    pub final_statement: SqlStatement,
    pub repairs: Vec<RepairAttempt>,
    pub declined: Vec<DeclinedRepair>,
    /// Number of full verification passes
    pub passes: u32,
}

impl VerificationReport {
    pub fn stages(&self) -> impl Iterator<Item = &StageResult> {
        std::iter::once(&self.grammar)
            .chain(self.schema.as_ref())
            .chain(self.execution.as_ref())
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages().find(|s| s.stage() == stage)
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.stages().flat_map(|s| s.findings().iter())
    }

    pub fn was_repaired(&self) -> bool {
        self.final_statement != self.original
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let verdict = if self.passed { "PASSED" } else { "FAILED" };
        let _ = writeln!(out, "SQL verification {}", verdict);
        let _ = writeln!(out, "Statement: {}", self.original);

        for stage in [Stage::Grammar, Stage::Schema, Stage::Execution] {
            match self.stage(stage) {
                Some(result) => render_stage(&mut out, result),
                None => {
                    let _ = writeln!(out, "\n{}: skipped", stage);
                }
            }
        }

        if !self.repairs.is_empty() {
            let _ = writeln!(out, "\nRepairs:");
            for repair in &self.repairs {
                let _ = writeln!(
                    out,
                    "  #{} {}: {} ({})",
                    repair.attempt,
                    repair.finding.kind,
                    repair.transformation,
                    if repair.resolved { "resolved" } else { "unresolved" }
                );
            }
        }

        if !self.declined.is_empty() {
            let _ = writeln!(out, "\nNot repaired:");
            for declined in &self.declined {
                let _ = writeln!(out, "  {}: {}", declined.finding.kind, declined.reason);
            }
        }

        let _ = writeln!(out);
        if self.was_repaired() {
            let _ = writeln!(out, "Final statement (repaired): {}", self.final_statement);
        } else {
            let _ = writeln!(out, "Final statement (unmodified): {}", self.final_statement);
        }
        let _ = writeln!(
            out,
            "Repair attempts: {}, verification passes: {}",
            self.repairs.len(),
            self.passes
        );
        out
    }
}

fn render_stage(out: &mut String, result: &StageResult) {
    let status = if result.passed() { "passed" } else { "failed" };
    let _ = writeln!(out, "\n{}: {}", result.stage(), status);
    for finding in result.findings() {
        let _ = writeln!(out, "  {}", finding);
        if let Some(hint) = &finding.hint {
            let _ = writeln!(out, "      fix: {}", hint);
        }
    }
    if let StageArtifacts::Execution(artifacts) = result.artifacts() {
        if !artifacts.columns.is_empty() {
            let _ = writeln!(out, "  columns: {}", artifacts.columns.join(", "));
        }
        for row in &artifacts.sample_rows {
            let _ = writeln!(out, "  | {}", row.join(" | "));
        }
    }
}
