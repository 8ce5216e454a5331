//! Repair Engine
//!
//! Turns the structured hint of an auto-fixable finding into a single local
//! text edit. Nothing here regenerates a statement: each transformation touches
//! only the bytes the finding points at, and any doubt yields no fix.

use crate::config::VerifierConfig;
use crate::statement::SqlStatement;
use crate::taxonomy::{ErrorKind, Finding, RepairHint, Span};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transformation {
    InsertDelimiter {
        delimiter: char,
        offset: usize,
    },
    ReplaceIdentifier {
        offset: usize,
        original: String,
        replacement: String,
    },
    SwapClauses {
        first: Span,
        second: Span,
    },
}

impl Transformation {
    /// Where a byte offset of the edited statement ends up after this edit
    pub fn map_offset(&self, offset: usize) -> usize {
        match self {
            Transformation::InsertDelimiter { delimiter, offset: at } => {
                if offset >= *at {
                    offset + delimiter.len_utf8()
                } else {
                    offset
                }
            }
            Transformation::ReplaceIdentifier {
                offset: at,
                original,
                replacement,
            } => {
                if offset >= at + original.len() {
                    offset - original.len() + replacement.len()
                } else {
                    offset
                }
            }
            // Rebuilt as head, second, gap, first, tail; total length is unchanged
            Transformation::SwapClauses { first, second } => {
                let gap = second.start.saturating_sub(first.end);
                if offset < first.start || offset >= second.end {
                    offset
                } else if offset >= second.start {
                    first.start + (offset - second.start)
                } else if offset >= first.end {
                    first.start + second.len() + (offset - first.end)
                } else {
                    first.start + second.len() + gap + (offset - first.start)
                }
            }
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transformation::InsertDelimiter { delimiter, offset } => {
                write!(f, "inserted '{}' at offset {}", delimiter, offset)
            }
            Transformation::ReplaceIdentifier {
                offset,
                original,
                replacement,
            } => write!(
                f,
                "replaced '{}' with '{}' at offset {}",
                original, replacement, offset
            ),
            Transformation::SwapClauses { first, second } => write!(
                f,
                "moved clause at {}..{} before clause at {}..{}",
                second.start, second.end, first.start, first.end
            ),
        }
    }
}

/// Why a finding was not repaired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Decline {
    NotAutoFixable,
    NoHint,
    LowConfidence { confidence: f64, threshold: f64 },
    HintMismatch,
    EditRejected,
}

impl fmt::Display for Decline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decline::NotAutoFixable => write!(f, "no automatic fix exists for this kind"),
            Decline::NoHint => write!(f, "no structured repair hint available"),
            Decline::LowConfidence {
                confidence,
                threshold,
            } => write!(
                f,
                "hint confidence {:.2} is below threshold {:.2}",
                confidence, threshold
            ),
            Decline::HintMismatch => write!(f, "hint does not apply to this finding kind"),
            Decline::EditRejected => {
                write!(f, "edit does not match the statement text")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepairEngine {
    confidence_threshold: f64,
}

impl Default for RepairEngine {
    fn default() -> Self {
        Self::new(&VerifierConfig::default())
    }
}

impl RepairEngine {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            confidence_threshold: config.repair_confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Statement with the finding fixed, or `None` when no fix is available
    pub fn repair(&self, statement: &SqlStatement, finding: &Finding) -> Option<SqlStatement> {
        self.attempt(statement, finding).ok().map(|(_, repaired)| repaired)
    }

    pub fn plan(&self, statement: &SqlStatement, finding: &Finding) -> Option<Transformation> {
        self.evaluate(statement, finding).ok()
    }

    /// Plan and apply in one step, keeping the reason when nothing is done
    pub fn attempt(
        &self,
        statement: &SqlStatement,
        finding: &Finding,
    ) -> Result<(Transformation, SqlStatement), Decline> {
        let transformation = self.evaluate(statement, finding)?;
        let repaired = self.apply(statement, &transformation).ok_or(Decline::EditRejected)?;
        debug!("Repair for {}: {}", finding.kind, transformation);
        Ok((transformation, repaired))
    }

    pub fn evaluate(
        &self,
        statement: &SqlStatement,
        finding: &Finding,
    ) -> Result<Transformation, Decline> {
        if !finding.auto_fixable() {
            return Err(Decline::NotAutoFixable);
        }
        let hint = finding.hint.as_ref().ok_or(Decline::NoHint)?;

        let transformation = match (finding.kind, hint) {
            (ErrorKind::UnbalancedDelimiter, RepairHint::InsertDelimiter { delimiter, offset }) => {
                Transformation::InsertDelimiter {
                    delimiter: *delimiter,
                    offset: *offset,
                }
            }
            (
                ErrorKind::UnknownTable | ErrorKind::UnknownColumn,
                RepairHint::ReplaceIdentifier {
                    offset,
                    original,
                    replacement,
                    ..
                },
            ) => Transformation::ReplaceIdentifier {
                offset: *offset,
                original: original.clone(),
                replacement: replacement.clone(),
            },
            (ErrorKind::ClauseOrderViolation, RepairHint::SwapClauses { first, second }) => {
                if !second_starts_with(statement, *second, finding.subject.as_deref()) {
                    return Err(Decline::EditRejected);
                }
                Transformation::SwapClauses {
                    first: *first,
                    second: *second,
                }
            }
            (_, RepairHint::Advice { .. }) => return Err(Decline::NoHint),
            _ => return Err(Decline::HintMismatch),
        };

        let confidence = finding.confidence.unwrap_or(0.0);
        if confidence < self.confidence_threshold {
            return Err(Decline::LowConfidence {
                confidence,
                threshold: self.confidence_threshold,
            });
        }

        Ok(transformation)
    }

    pub fn apply(
        &self,
        statement: &SqlStatement,
        transformation: &Transformation,
    ) -> Option<SqlStatement> {
        let text = statement.text();
        match transformation {
            Transformation::InsertDelimiter { delimiter, offset } => {
                statement.with_edit(*offset, 0, &delimiter.to_string())
            }
            Transformation::ReplaceIdentifier {
                offset,
                original,
                replacement,
            } => {
                let end = offset.checked_add(original.len())?;
                if text.get(*offset..end)? != original {
                    return None;
                }
                statement.with_edit(*offset, original.len(), replacement)
            }
            Transformation::SwapClauses { first, second } => {
                if first.is_empty() || second.is_empty() || first.end > second.start {
                    return None;
                }
                let head = text.get(..first.start)?;
                let leading = text.get(first.start..first.end)?;
                let gap = text.get(first.end..second.start)?;
                let trailing = text.get(second.start..second.end)?;
                let tail = text.get(second.end..)?;
                Some(SqlStatement::new(format!(
                    "{}{}{}{}{}",
                    head, trailing, gap, leading, tail
                )))
            }
        }
    }
}

/// The moved span must open with the clause keyword the finding names
fn second_starts_with(statement: &SqlStatement, span: Span, clause: Option<&str>) -> bool {
    let (Some(clause), Some(text)) = (clause, statement.text().get(span.start..span.end)) else {
        return false;
    };
    let words = text.split_whitespace();
    clause
        .split_whitespace()
        .zip(words)
        .all(|(expected, found)| expected.eq_ignore_ascii_case(&found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Severity;

    fn engine() -> RepairEngine {
        RepairEngine::default()
    }

    #[test]
    fn test_insert_closing_paren() {
        let sql = "SELECT * FROM employees WHERE (salary > 50000";
        let finding = Finding::new(ErrorKind::UnbalancedDelimiter, "Unclosed '('")
            .at(30)
            .with_hint(RepairHint::InsertDelimiter {
                delimiter: ')',
                offset: sql.len(),
            })
            .with_confidence(0.9);
        let repaired = engine().repair(&SqlStatement::new(sql), &finding).unwrap();
        assert_eq!(
            repaired.text(),
            "SELECT * FROM employees WHERE (salary > 50000)"
        );
    }

    #[test]
    fn test_replace_identifier_checks_original_text() {
        let stmt = SqlStatement::new("SELECT * FROM emplyees");
        let finding = Finding::new(ErrorKind::UnknownTable, "Unknown table 'emplyees'")
            .at(14)
            .subject("emplyees")
            .with_hint(RepairHint::ReplaceIdentifier {
                offset: 14,
                original: "emplyees".to_string(),
                replacement: "employees".to_string(),
                distance: 1,
            })
            .with_confidence(0.89);
        let repaired = engine().repair(&stmt, &finding).unwrap();
        assert_eq!(repaired.text(), "SELECT * FROM employees");

        let stale = SqlStatement::new("SELECT * FROM   emplyees");
        assert_eq!(engine().attempt(&stale, &finding).unwrap_err(), Decline::EditRejected);
    }

    #[test]
    fn test_swap_adjacent_clauses() {
        let sql = "SELECT * FROM employees ORDER BY name WHERE id = 1";
        let first = sql.find("ORDER").unwrap();
        let second = sql.find("WHERE").unwrap();
        let finding = Finding::new(ErrorKind::ClauseOrderViolation, "WHERE must precede ORDER BY")
            .at(second)
            .subject("WHERE")
            .with_hint(RepairHint::SwapClauses {
                first: Span::new(first, second - 1),
                second: Span::new(second, sql.len()),
            })
            .with_confidence(0.9);
        let (transformation, repaired) = engine().attempt(&SqlStatement::new(sql), &finding).unwrap();
        assert!(matches!(transformation, Transformation::SwapClauses { .. }));
        assert_eq!(
            repaired.text(),
            "SELECT * FROM employees WHERE id = 1 ORDER BY name"
        );
    }

    #[test]
    fn test_offsets_follow_the_edit() {
        let insert = Transformation::InsertDelimiter {
            delimiter: ')',
            offset: 10,
        };
        assert_eq!(insert.map_offset(4), 4);
        assert_eq!(insert.map_offset(10), 11);

        let replace = Transformation::ReplaceIdentifier {
            offset: 14,
            original: "emplyees".to_string(),
            replacement: "employees".to_string(),
        };
        assert_eq!(replace.map_offset(14), 14);
        assert_eq!(replace.map_offset(23), 24);

        let sql = "SELECT * FROM employees ORDER BY name WHERE id = 1";
        let swapped = "SELECT * FROM employees WHERE id = 1 ORDER BY name";
        let first = sql.find("ORDER").unwrap();
        let second = sql.find("WHERE").unwrap();
        let swap = Transformation::SwapClauses {
            first: Span::new(first, second - 1),
            second: Span::new(second, sql.len()),
        };
        assert_eq!(swap.map_offset(second), swapped.find("WHERE").unwrap());
        assert_eq!(swap.map_offset(first), swapped.find("ORDER").unwrap());
        assert_eq!(swap.map_offset(sql.find("name").unwrap()), swapped.find("name").unwrap());
        assert_eq!(swap.map_offset(9), 9);
    }

    #[test]
    fn test_low_confidence_is_declined() {
        let finding = Finding::new(ErrorKind::UnbalancedDelimiter, "Stray ')'")
            .at(20)
            .with_hint(RepairHint::InsertDelimiter {
                delimiter: '(',
                offset: 7,
            })
            .with_confidence(0.6);
        let stmt = SqlStatement::new("SELECT a FROM t WHERE b)");
        assert!(engine().plan(&stmt, &finding).is_none());
        assert!(matches!(
            engine().evaluate(&stmt, &finding),
            Err(Decline::LowConfidence { .. })
        ));
    }

    #[test]
    fn test_non_fixable_and_hintless_findings() {
        let stmt = SqlStatement::new("SELECT name, COUNT(*) FROM employees");
        let grouping = Finding::new(ErrorKind::MissingGroupBy, "name is not grouped")
            .with_severity(Severity::Error);
        assert_eq!(engine().evaluate(&stmt, &grouping), Err(Decline::NotAutoFixable));

        let bare = Finding::new(ErrorKind::UnknownColumn, "Unknown column 'zzz'");
        assert_eq!(engine().evaluate(&stmt, &bare), Err(Decline::NoHint));
    }

    #[test]
    fn test_out_of_bounds_edit_is_rejected() {
        let stmt = SqlStatement::new("SELECT 1");
        let transformation = Transformation::InsertDelimiter {
            delimiter: ')',
            offset: 42,
        };
        assert!(engine().apply(&stmt, &transformation).is_none());
    }
}
