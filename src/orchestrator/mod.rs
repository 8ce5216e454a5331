//! Feedback Orchestrator
//!
//! Drives one statement through grammar, schema and execution verification,
//! then repairs the most severe auto-fixable finding and re-verifies from
//! scratch. The loop is bounded by `max_repair_attempts` and never targets the
//! same (kind, offset) pair twice, so a session ends after at most
//! `max_repair_attempts + 1` passes.

pub mod report;
pub mod state;

pub use report::{DeclinedRepair, RepairAttempt, VerificationReport};
pub use state::SessionState;

use crate::config::VerifierConfig;
use crate::error::Result;
use crate::execution::{ExecutionBackend, ExecutionVerifier, SqliteBackend};
use crate::grammar::GrammarVerifier;
use crate::repair::RepairEngine;
use crate::schema::{SampleDataset, SchemaModel};
use crate::semantic::SchemaVerifier;
use crate::stage::StageResult;
use crate::statement::SqlStatement;
use crate::taxonomy::{ErrorKind, Finding, Stage};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stage results of one full verification pass
struct Pass {
    grammar: StageResult,
    schema: Option<StageResult>,
    execution: Option<StageResult>,
}

impl Pass {
    fn stage(&self, stage: Stage) -> Option<&StageResult> {
        match stage {
            Stage::Grammar => Some(&self.grammar),
            Stage::Schema => self.schema.as_ref(),
            Stage::Execution => self.execution.as_ref(),
        }
    }

    /// Auto-fixable findings not yet targeted, most severe first. The sort is
    /// stable, so equal severities keep stage and detection order.
    fn repair_candidates(&self, consumed: &HashSet<(ErrorKind, Option<usize>)>) -> Vec<&Finding> {
        let stages = [Some(&self.grammar), self.schema.as_ref(), self.execution.as_ref()];
        let mut candidates: Vec<&Finding> = stages
            .into_iter()
            .flatten()
            .flat_map(|s| s.findings().iter())
            .filter(|f| f.auto_fixable() && !consumed.contains(&f.repair_key()))
            .collect();
        candidates.sort_by(|a, b| b.severity.cmp(&a.severity));
        candidates
    }
}

/// Repair awaiting confirmation on the next pass
struct Pending {
    index: usize,
    stage: Stage,
    kind: ErrorKind,
    /// Offset of the targeted finding in the repaired statement
    offset: Option<usize>,
}

pub struct Orchestrator {
    config: VerifierConfig,
    grammar: GrammarVerifier,
    schema: SchemaVerifier,
    execution: ExecutionVerifier,
    repair: RepairEngine,
}

impl Orchestrator {
    /// Orchestrator backed by the embedded SQLite backend
    pub fn new(config: VerifierConfig) -> Result<Self> {
        Self::with_backend(config, Arc::new(SqliteBackend::new()))
    }

    pub fn with_backend(config: VerifierConfig, backend: Arc<dyn ExecutionBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            grammar: GrammarVerifier::new(),
            schema: SchemaVerifier::new(&config),
            execution: ExecutionVerifier::new(backend, &config),
            repair: RepairEngine::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify one statement, repairing it when allowed.
    ///
    /// Statement problems are reported as findings in the returned report;
    /// `Err` means the execution backend or the sample dataset is unusable.
    pub fn verify(
        &self,
        sql: &str,
        schema: &SchemaModel,
        dataset: Option<&SampleDataset>,
    ) -> Result<VerificationReport> {
        let original = SqlStatement::new(sql);
        let mut statement = original.clone();
        let mut state = SessionState::Pending;
        let mut repairs: Vec<RepairAttempt> = Vec::new();
        let mut declined: Vec<DeclinedRepair> = Vec::new();
        let mut consumed: HashSet<(ErrorKind, Option<usize>)> = HashSet::new();
        let mut pending: Option<Pending> = None;
        let mut passes = 0u32;

        info!("Verifying statement ({} bytes)", sql.len());

        let last = loop {
            passes += 1;
            debug!("Verification pass {}", passes);
            let pass = self.run_pass(&statement, schema, dataset, &mut state)?;

            // Resolved when the targeted finding itself is gone; other findings
            // of the same kind (an outer unclosed paren) do not count
            if let Some(p) = pending.take() {
                let resolved = pass
                    .stage(p.stage)
                    .map(|s| {
                        !s.findings()
                            .iter()
                            .any(|f| f.kind == p.kind && f.offset == p.offset)
                    })
                    .unwrap_or(false);
                if let Some(attempt) = repairs.get_mut(p.index) {
                    attempt.resolved = resolved;
                }
                if !resolved {
                    warn!("Repair of {} did not resolve the finding", p.kind);
                }
            }

            if !self.config.auto_fix {
                break pass;
            }
            let attempt_number = repairs.len() as u32 + 1;
            if attempt_number > self.config.max_repair_attempts {
                info!(
                    "Repair bound reached ({} attempts)",
                    self.config.max_repair_attempts
                );
                break pass;
            }

            let candidates = pass.repair_candidates(&consumed);
            if candidates.is_empty() {
                break pass;
            }
            state.advance(SessionState::Repairing);

            let mut repaired = None;
            for finding in candidates {
                consumed.insert(finding.repair_key());
                match self.repair.attempt(&statement, finding) {
                    Ok((transformation, next)) => {
                        info!(
                            "Repair attempt {} of {}: {} ({})",
                            attempt_number,
                            self.config.max_repair_attempts,
                            finding.kind,
                            transformation
                        );
                        pending = Some(Pending {
                            index: repairs.len(),
                            stage: finding.stage,
                            kind: finding.kind,
                            offset: finding.offset.map(|o| transformation.map_offset(o)),
                        });
                        repairs.push(RepairAttempt {
                            attempt: attempt_number,
                            finding: finding.clone(),
                            transformation,
                            statement: next.clone(),
                            resolved: false,
                        });
                        repaired = Some(next);
                        break;
                    }
                    Err(reason) => {
                        debug!("No repair for {}: {}", finding.kind, reason);
                        declined.push(DeclinedRepair {
                            finding: finding.clone(),
                            reason,
                        });
                    }
                }
            }

            match repaired {
                Some(next) => statement = next,
                None => break pass,
            }
        };

        state.advance(SessionState::Done);

        let Pass {
            grammar,
            schema: schema_result,
            execution,
        } = last;
        let passed = grammar.passed()
            && schema_result.as_ref().map_or(true, StageResult::passed)
            && execution.as_ref().map_or(true, StageResult::passed);

        info!(
            "Verification {} after {} pass(es) and {} repair(s)",
            if passed { "passed" } else { "failed" },
            passes,
            repairs.len()
        );

        Ok(VerificationReport {
            original,
            grammar,
            schema: schema_result,
            execution,
            passed,
            final_statement: statement,
            repairs,
            declined,
            passes,
        })
    }

    fn run_pass(
        &self,
        statement: &SqlStatement,
        schema: &SchemaModel,
        dataset: Option<&SampleDataset>,
        state: &mut SessionState,
    ) -> Result<Pass> {
        state.advance(SessionState::Grammar);
        let grammar = self.grammar.verify(statement);
        if grammar.has_critical() {
            debug!("Critical grammar finding; skipping schema and execution");
            return Ok(Pass {
                grammar,
                schema: None,
                execution: None,
            });
        }

        state.advance(SessionState::Schema);
        let schema_result = self.schema.verify(statement, schema);

        state.advance(SessionState::Execution);
        let execution = self.execution.verify(statement, schema, dataset)?;

        Ok(Pass {
            grammar,
            schema: Some(schema_result),
            execution: Some(execution),
        })
    }
}
