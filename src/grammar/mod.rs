//! Grammar Verifier
//!
//! Token-level structure checks, run in a fixed order: a single statement,
//! delimiter balance, clause ordering, reserved-word misuse, then empty
//! clauses and joins without a condition. Pure function of the statement text.

pub mod clauses;
pub mod delimiters;
pub mod formatter;

use crate::stage::{StageArtifacts, StageResult};
use crate::statement::{SqlStatement, Token, TokenKind};
use crate::taxonomy::{ErrorKind, Finding, RepairHint, Severity, Span, Stage};
use clauses::{recognize, Clause, ClauseLayout, MarkKind, Region};
use delimiters::Imbalance;
use std::collections::BTreeSet;
use tracing::debug;

/// Words that must be quoted when used as a table, column or alias name
const RESERVED_WORDS: &[&str] = &[
    "ALL", "ALTER", "AND", "AS", "ASC", "AVG", "BETWEEN", "BY", "CASE", "COUNT", "CREATE",
    "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "END", "EXCEPT", "EXISTS", "FROM", "GROUP",
    "HAVING", "IN", "INDEX", "INNER", "INSERT", "INTERSECT", "IS", "JOIN", "LEFT", "LIKE",
    "LIMIT", "MAX", "MIN", "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "RECURSIVE",
    "RIGHT", "SELECT", "SUM", "TABLE", "THEN", "UNION", "UPDATE", "VIEW", "WHEN", "WHERE",
    "WITH",
];

const AGGREGATES: &[&str] = &["AVG", "COUNT", "MAX", "MIN", "SUM"];

fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS
        .binary_search(&word.to_ascii_uppercase().as_str())
        .is_ok()
}

#[derive(Debug, Default, Clone)]
pub struct GrammarVerifier;

impl GrammarVerifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(&self, statement: &SqlStatement) -> StageResult {
        let tokens = statement.tokens();
        let mut findings = Vec::new();

        if tokens.is_empty() {
            findings.push(Finding::new(
                ErrorKind::EmptyStatement,
                "Statement contains no SQL tokens",
            ));
            return finish(statement, findings, None);
        }

        // Clause checks would read the second statement as part of the first
        if let Some(extra) = statement.trailing_statement() {
            findings.push(
                Finding::new(
                    ErrorKind::MultipleStatements,
                    format!(
                        "Another statement starts at offset {}; only one statement can be verified",
                        extra.offset
                    ),
                )
                .at(extra.offset)
                .subject(extra.text.clone())
                .with_hint(RepairHint::advice("verify each statement separately")),
            );
            return finish(statement, findings, None);
        }

        if let Some(imbalance) = delimiters::scan(statement.text()) {
            findings.push(delimiter_finding(statement, &imbalance));
        }

        let layout = ClauseLayout::build(tokens);
        for (_, region) in layout.query_regions() {
            check_clause_order(tokens, region, &mut findings);
        }
        check_reserved_words(tokens, &mut findings);
        for (_, region) in layout.query_regions() {
            check_empty_clauses(tokens, region, &mut findings);
        }
        for (id, region) in layout.query_regions() {
            check_join_conditions(tokens, &layout, id, region, &mut findings);
        }

        let formatted = if findings.iter().any(|f| f.severity == Severity::Critical) {
            None
        } else {
            Some(formatter::format(statement))
        };
        finish(statement, findings, formatted)
    }
}

fn finish(statement: &SqlStatement, findings: Vec<Finding>, formatted: Option<String>) -> StageResult {
    debug!("Grammar stage produced {} finding(s)", findings.len());
    StageResult::new(
        Stage::Grammar,
        statement.clone(),
        findings,
        StageArtifacts::Grammar { formatted },
    )
}

fn delimiter_finding(statement: &SqlStatement, imbalance: &Imbalance) -> Finding {
    let offset = imbalance.offset();
    let message = match imbalance {
        Imbalance::StrayClose { .. } => format!("Unmatched ')' at offset {}", offset),
        Imbalance::UnclosedParen { open_count, .. } if *open_count > 1 => format!(
            "Unclosed '(' at offset {} ({} parentheses left open)",
            offset, open_count
        ),
        Imbalance::UnclosedParen { .. } => format!("Unclosed '(' at offset {}", offset),
        Imbalance::UnclosedQuote { quote, .. } => {
            format!("Unterminated {} quote opened at offset {}", quote, offset)
        }
    };

    let mut finding = Finding::new(ErrorKind::UnbalancedDelimiter, message)
        .at(offset)
        .subject(imbalance.delimiter().to_string());
    if let Some(insertion) = delimiters::plan_insertion(statement, imbalance) {
        finding = finding
            .with_hint(RepairHint::InsertDelimiter {
                delimiter: insertion.delimiter,
                offset: insertion.offset,
            })
            .with_confidence(insertion.confidence);
    }
    finding
}

/// Fixed-order state machine over the clause keywords of one query level.
/// The state is the highest clause seen so far; a set operator resets it.
fn check_clause_order(tokens: &[Token], region: &Region, findings: &mut Vec<Finding>) {
    let mut state: Option<(usize, Clause)> = None;

    for (idx, mark) in region.marks.iter().enumerate() {
        let clause = match mark.kind {
            MarkKind::SetOperator => {
                state = Some((idx, Clause::With));
                continue;
            }
            MarkKind::Clause(c) => c,
        };

        let (prev_idx, prev) = match state {
            Some((prev_idx, prev)) if clause <= prev => (prev_idx, prev),
            _ => {
                state = Some((idx, clause));
                continue;
            }
        };
        let prev_mark = &region.marks[prev_idx];

        if matches!(prev_mark.kind, MarkKind::SetOperator) {
            findings.push(
                Finding::new(
                    ErrorKind::ClauseOrderViolation,
                    format!(
                        "{} at offset {} cannot directly follow {} at offset {}",
                        clause,
                        mark.offset,
                        prev_mark.label(tokens),
                        prev_mark.offset
                    ),
                )
                .at(mark.offset)
                .subject(clause.as_str()),
            );
            continue;
        }

        let message = if clause == prev {
            format!(
                "Duplicate {} clause at offset {} (first at offset {})",
                clause, mark.offset, prev_mark.offset
            )
        } else {
            format!(
                "{} at offset {} must precede {} at offset {}",
                clause, mark.offset, prev, prev_mark.offset
            )
        };
        let mut finding = Finding::new(ErrorKind::ClauseOrderViolation, message)
            .at(mark.offset)
            .subject(clause.as_str());
        if let Some(hint) = swap_hint(tokens, region, prev_idx, idx) {
            finding = finding.with_hint(hint).with_confidence(0.9);
        }
        findings.push(finding);
    }
}

/// Swap is only proposed for two adjacent clauses whose exchange leaves a
/// legal order with both neighbours.
fn swap_hint(tokens: &[Token], region: &Region, first: usize, second: usize) -> Option<RepairHint> {
    if second != first + 1 {
        return None;
    }
    let late = region.marks[first].clause()?;
    let early = region.marks[second].clause()?;
    if early >= late {
        return None;
    }
    if first > 0 {
        match region.marks[first - 1].kind {
            MarkKind::Clause(before) if before < early => {}
            MarkKind::SetOperator if early == Clause::Select => {}
            _ => return None,
        }
    }
    if let Some(after) = region.marks.get(second + 1) {
        if let MarkKind::Clause(after) = after.kind {
            if after <= late {
                return None;
            }
        }
    }

    let first_mark = &region.marks[first];
    let second_mark = &region.marks[second];
    let first_end = tokens.get(second_mark.token.checked_sub(1)?)?.end();
    let second_end = tokens.get(region.body_end(second, tokens).checked_sub(1)?)?.end();

    Some(RepairHint::SwapClauses {
        first: Span::new(first_mark.offset, first_end),
        second: Span::new(second_mark.offset, second_end),
    })
}

fn check_reserved_words(tokens: &[Token], findings: &mut Vec<Finding>) {
    let mut flagged = BTreeSet::new();

    for (i, token) in tokens.iter().enumerate() {
        if !matches!(token.kind, TokenKind::Keyword | TokenKind::Identifier) || !is_reserved(&token.text) {
            continue;
        }
        let prev = i.checked_sub(1).and_then(|p| tokens.get(p));
        let next = tokens.get(i + 1);
        let called = next.map_or(false, |n| n.kind == TokenKind::LParen);

        let after_alias = prev.map_or(false, |p| p.is_keyword("AS"));
        let qualified = prev.map_or(false, |p| p.kind == TokenKind::Dot)
            || next.map_or(false, |n| n.kind == TokenKind::Dot);
        let table_position = prev.map_or(false, |p| p.is_keyword("FROM") || p.is_keyword("JOIN"))
            && recognize(tokens, i).is_none();
        let bare_aggregate = token.kind == TokenKind::Identifier
            && AGGREGATES.contains(&token.upper().as_str());

        let misused = if called {
            false
        } else {
            after_alias || qualified || table_position || bare_aggregate
        };
        if misused && flagged.insert(token.offset) {
            findings.push(
                Finding::new(
                    ErrorKind::ReservedWordMisuse,
                    format!("Reserved word '{}' used as identifier", token.text),
                )
                .at(token.offset)
                .subject(token.text.clone())
                .with_hint(RepairHint::advice(format!(
                    "quote the identifier as \"{}\" or choose another name",
                    token.text
                ))),
            );
        }
    }
}

fn is_connector(token: &Token) -> bool {
    token.kind == TokenKind::Comma || token.is_keyword("AND") || token.is_keyword("OR")
}

fn check_empty_clauses(tokens: &[Token], region: &Region, findings: &mut Vec<Finding>) {
    for (idx, mark) in region.marks.iter().enumerate() {
        let clause = match mark.clause() {
            Some(c) => c,
            None => continue,
        };
        let end = region.body_end(idx, tokens);
        let body = tokens.get(mark.body_start..end).unwrap_or_default();

        let problem = match (body.first(), body.last()) {
            (None, _) | (_, None) => Some(format!("{} clause at offset {} is empty", clause, mark.offset)),
            (Some(first), _) if is_connector(first) => Some(format!(
                "{} clause at offset {} starts with a dangling '{}'",
                clause,
                mark.offset,
                first.upper()
            )),
            (_, Some(last)) if is_connector(last) => Some(format!(
                "{} clause at offset {} ends with a dangling '{}'",
                clause,
                mark.offset,
                last.upper()
            )),
            _ => None,
        };

        if let Some(message) = problem {
            findings.push(
                Finding::new(ErrorKind::EmptyClause, message)
                    .at(mark.offset)
                    .subject(clause.as_str()),
            );
        }
    }
}

fn check_join_conditions(
    tokens: &[Token],
    layout: &ClauseLayout,
    region_id: usize,
    region: &Region,
    findings: &mut Vec<Finding>,
) {
    let in_region = |j: usize| layout.token_region.get(j) == Some(&region_id);
    let mark_tokens: BTreeSet<usize> = region.marks.iter().map(|m| m.token).collect();
    let end = region.close_token.unwrap_or(tokens.len());
    let start = region.open_token.map_or(0, |o| o + 1);

    for i in start..end {
        let token = &tokens[i];
        if !in_region(i) || !token.is_keyword("JOIN") {
            continue;
        }
        let unconditioned = (i.saturating_sub(2)..i)
            .any(|p| tokens[p].is_keyword("CROSS") || tokens[p].is_keyword("NATURAL"));
        if unconditioned {
            continue;
        }

        let mut has_condition = false;
        for j in i + 1..end {
            if !in_region(j) {
                continue;
            }
            let t = &tokens[j];
            if t.is_keyword("ON") || t.is_keyword("USING") {
                has_condition = true;
                break;
            }
            if t.is_keyword("JOIN") || t.kind == TokenKind::Comma || mark_tokens.contains(&j) {
                break;
            }
        }

        if !has_condition {
            findings.push(
                Finding::new(
                    ErrorKind::MissingJoinCondition,
                    format!("JOIN at offset {} has no ON or USING condition", token.offset),
                )
                .at(token.offset)
                .subject("JOIN")
                .with_hint(RepairHint::advice("add an ON condition or write CROSS JOIN")),
            );
        }
    }
}
