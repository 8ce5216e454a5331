//! Delimiter balance: a single left-to-right scan with a stack.

use super::clauses::{recognize, ClauseLayout, MarkKind};
use crate::statement::{SqlStatement, TokenKind};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CLAUSE_AFTER_QUOTE: Regex = Regex::new(
        r"(?i)\s+(FROM|WHERE|GROUP\s+BY|HAVING|ORDER\s+BY|LIMIT|UNION|INTERSECT|EXCEPT)\b"
    )
    .expect("valid clause pattern");
}

/// Confidence for closing a parenthesis at the end of the statement
const CLOSE_AT_END: f64 = 0.9;
/// Confidence for closing a parenthesis before the next clause keyword
const CLOSE_BEFORE_CLAUSE: f64 = 0.85;
const QUOTE_AT_END: f64 = 0.8;
const QUOTE_BEFORE_CLAUSE: f64 = 0.7;
/// Where a stray `)` was opened is a guess
const OPEN_FOR_STRAY: f64 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub enum Imbalance {
    /// A `)` with no matching `(`
    StrayClose { offset: usize },
    /// The innermost `(` still open at the end of the statement
    UnclosedParen { offset: usize, open_count: usize },
    UnclosedQuote { offset: usize, quote: char },
}

impl Imbalance {
    pub fn offset(&self) -> usize {
        match self {
            Imbalance::StrayClose { offset }
            | Imbalance::UnclosedParen { offset, .. }
            | Imbalance::UnclosedQuote { offset, .. } => *offset,
        }
    }

    pub fn delimiter(&self) -> char {
        match self {
            Imbalance::StrayClose { .. } => ')',
            Imbalance::UnclosedParen { .. } => '(',
            Imbalance::UnclosedQuote { quote, .. } => *quote,
        }
    }
}

/// Proposed insertion fixing an imbalance
#[derive(Debug, Clone, PartialEq)]
pub struct Insertion {
    pub delimiter: char,
    pub offset: usize,
    pub confidence: f64,
}

/// Scan for the first unmatched delimiter.
///
/// When several `(` are still open at the end, the innermost one is reported.
/// Its closing `)` goes where the innermost group ends, and the next pass
/// reports the enclosing `(`, so each repair closes exactly one level.
pub fn scan(text: &str) -> Option<Imbalance> {
    let mut stack: Vec<usize> = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '-' if chars.peek().map(|(_, n)| *n) == Some('-') => {
                for (_, n) in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek().map(|(_, n)| *n) == Some('*') => {
                chars.next();
                let mut prev = '\0';
                for (_, n) in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                let mut closed = false;
                while let Some((_, n)) = chars.next() {
                    if n == close {
                        if close != ']' && chars.peek().map(|(_, p)| *p) == Some(close) {
                            chars.next();
                            continue;
                        }
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Some(Imbalance::UnclosedQuote { offset, quote: c });
                }
            }
            '(' => stack.push(offset),
            ')' => {
                if stack.pop().is_none() {
                    return Some(Imbalance::StrayClose { offset });
                }
            }
            _ => {}
        }
    }

    stack.last().map(|offset| Imbalance::UnclosedParen {
        offset: *offset,
        open_count: stack.len(),
    })
}

/// Where to insert the missing counterpart of an imbalance
pub fn plan_insertion(statement: &SqlStatement, imbalance: &Imbalance) -> Option<Insertion> {
    match imbalance {
        Imbalance::UnclosedParen { offset, .. } => close_paren(statement, *offset),
        Imbalance::UnclosedQuote { offset, quote } => close_quote(statement, *offset, *quote),
        Imbalance::StrayClose { offset } => open_paren(statement, *offset),
    }
}

/// Close an open parenthesis at the end of its clause. A subquery runs to the
/// end of the statement; any other group ends before the next clause keyword.
fn close_paren(statement: &SqlStatement, open_offset: usize) -> Option<Insertion> {
    let tokens = statement.tokens();
    let open = tokens
        .iter()
        .position(|t| t.kind == TokenKind::LParen && t.offset == open_offset)?;
    let is_subquery = tokens
        .get(open + 1)
        .map_or(false, |t| t.is_keyword("SELECT") || t.is_keyword("WITH"));

    let mut local_depth = 0usize;
    let mut j = open + 1;
    while j < tokens.len() {
        let token = &tokens[j];
        match token.kind {
            TokenKind::LParen => local_depth += 1,
            TokenKind::RParen => local_depth = local_depth.saturating_sub(1),
            TokenKind::Semicolon if local_depth == 0 => break,
            _ if local_depth == 0 && !is_subquery && recognize(tokens, j).is_some() => {
                return Some(Insertion {
                    delimiter: ')',
                    offset: tokens[j - 1].end(),
                    confidence: CLOSE_BEFORE_CLAUSE,
                });
            }
            _ => {}
        }
        j += 1;
    }

    let offset = if j < tokens.len() {
        tokens[j - 1].end()
    } else {
        statement.body_end()
    };
    Some(Insertion {
        delimiter: ')',
        offset,
        confidence: CLOSE_AT_END,
    })
}

fn close_quote(statement: &SqlStatement, open_offset: usize, quote: char) -> Option<Insertion> {
    let text = statement.text();
    let close = if quote == '[' { ']' } else { quote };
    let rest_start = open_offset + quote.len_utf8();
    let rest = text.get(rest_start..)?;

    if let Some(m) = CLAUSE_AFTER_QUOTE.find(rest) {
        return Some(Insertion {
            delimiter: close,
            offset: rest_start + m.start(),
            confidence: QUOTE_BEFORE_CLAUSE,
        });
    }

    let trimmed = rest.trim_end();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();
    Some(Insertion {
        delimiter: close,
        offset: rest_start + trimmed.len(),
        confidence: QUOTE_AT_END,
    })
}

/// Open a parenthesis at the start of the clause holding the stray `)`
fn open_paren(statement: &SqlStatement, close_offset: usize) -> Option<Insertion> {
    let tokens = statement.tokens();
    let layout = ClauseLayout::build(tokens);
    let body_start = layout.regions[0]
        .marks
        .iter()
        .filter(|m| m.offset < close_offset && matches!(m.kind, MarkKind::Clause(_)))
        .last()
        .map(|m| m.body_start)
        .unwrap_or(0);

    let target = tokens.get(body_start)?;
    if target.offset >= close_offset {
        return None;
    }
    Some(Insertion {
        delimiter: '(',
        offset: target.offset,
        confidence: OPEN_FOR_STRAY,
    })
}
