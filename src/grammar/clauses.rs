//! Clause layout: recognizes clause keywords and groups them per
//! parenthesis region so every query level gets its own state machine.

use crate::statement::{Token, TokenKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Clauses of a query in their mandatory order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Clause {
    With,
    Select,
    From,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Offset,
}

impl Clause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Clause::With => "WITH",
            Clause::Select => "SELECT",
            Clause::From => "FROM",
            Clause::Where => "WHERE",
            Clause::GroupBy => "GROUP BY",
            Clause::Having => "HAVING",
            Clause::OrderBy => "ORDER BY",
            Clause::Limit => "LIMIT",
            Clause::Offset => "OFFSET",
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    Clause(Clause),
    /// UNION / INTERSECT / EXCEPT
    SetOperator,
}

/// A recognized clause keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClauseMark {
    pub kind: MarkKind,
    /// Index of the first keyword token
    pub token: usize,
    /// Index of the first token after the keyword(s)
    pub body_start: usize,
    pub offset: usize,
}

impl ClauseMark {
    pub fn clause(&self) -> Option<Clause> {
        match self.kind {
            MarkKind::Clause(c) => Some(c),
            MarkKind::SetOperator => None,
        }
    }

    pub fn label(&self, tokens: &[Token]) -> String {
        match self.kind {
            MarkKind::Clause(c) => c.as_str().to_string(),
            MarkKind::SetOperator => tokens[self.token].upper(),
        }
    }
}

/// Recognize a clause keyword starting at token `i`
pub fn recognize(tokens: &[Token], i: usize) -> Option<(MarkKind, usize)> {
    let token = tokens.get(i)?;
    if token.kind != TokenKind::Keyword {
        return None;
    }
    let next_is = |kw: &str| tokens.get(i + 1).map_or(false, |t| t.is_keyword(kw));

    let clause = match token.upper().as_str() {
        "WITH" => Clause::With,
        "SELECT" => Clause::Select,
        "FROM" => Clause::From,
        "WHERE" => Clause::Where,
        "HAVING" => Clause::Having,
        "LIMIT" => Clause::Limit,
        "OFFSET" => Clause::Offset,
        "GROUP" if next_is("BY") => return Some((MarkKind::Clause(Clause::GroupBy), 2)),
        "ORDER" if next_is("BY") => return Some((MarkKind::Clause(Clause::OrderBy), 2)),
        "UNION" | "INTERSECT" | "EXCEPT" => {
            let width = if next_is("ALL") || next_is("DISTINCT") { 2 } else { 1 };
            return Some((MarkKind::SetOperator, width));
        }
        _ => return None,
    };
    Some((MarkKind::Clause(clause), 1))
}

/// One parenthesis level. Region 0 is the statement itself.
#[derive(Debug, Clone)]
pub struct Region {
    pub open_token: Option<usize>,
    /// Index of the matching `)`, if the region is closed
    pub close_token: Option<usize>,
    /// Region 0, or a parenthesis whose content starts with SELECT / WITH
    pub is_query: bool,
    pub marks: Vec<ClauseMark>,
}

impl Region {
    /// Token index where the body of mark `idx` ends (exclusive)
    pub fn body_end(&self, idx: usize, tokens: &[Token]) -> usize {
        if let Some(next) = self.marks.get(idx + 1) {
            return next.token;
        }
        let mut end = self.close_token.unwrap_or(tokens.len());
        if self.open_token.is_none() {
            while end > 0 && tokens[end - 1].kind == TokenKind::Semicolon {
                end -= 1;
            }
        }
        end
    }
}

#[derive(Debug, Clone)]
pub struct ClauseLayout {
    pub regions: Vec<Region>,
    /// Region id of every token (a parenthesis belongs to its outer region)
    pub token_region: Vec<usize>,
}

impl ClauseLayout {
    pub fn build(tokens: &[Token]) -> Self {
        let mut regions = vec![Region {
            open_token: None,
            close_token: None,
            is_query: true,
            marks: Vec::new(),
        }];
        let mut token_region = Vec::with_capacity(tokens.len());
        let mut stack: Vec<usize> = vec![0];

        let mut i = 0;
        while i < tokens.len() {
            let current = *stack.last().unwrap_or(&0);
            let token = &tokens[i];
            match token.kind {
                TokenKind::LParen => {
                    token_region.push(current);
                    let is_query = tokens
                        .get(i + 1)
                        .map_or(false, |t| t.is_keyword("SELECT") || t.is_keyword("WITH"));
                    regions.push(Region {
                        open_token: Some(i),
                        close_token: None,
                        is_query,
                        marks: Vec::new(),
                    });
                    stack.push(regions.len() - 1);
                    i += 1;
                }
                TokenKind::RParen => {
                    if stack.len() > 1 {
                        if let Some(region) = stack.pop() {
                            regions[region].close_token = Some(i);
                        }
                    }
                    token_region.push(*stack.last().unwrap_or(&0));
                    i += 1;
                }
                _ => {
                    if let Some((kind, width)) = recognize(tokens, i) {
                        regions[current].marks.push(ClauseMark {
                            kind,
                            token: i,
                            body_start: (i + width).min(tokens.len()),
                            offset: token.offset,
                        });
                        for _ in 0..width {
                            token_region.push(current);
                        }
                        i += width;
                    } else {
                        token_region.push(current);
                        i += 1;
                    }
                }
            }
        }

        Self {
            regions,
            token_region,
        }
    }

    pub fn query_regions(&self) -> impl Iterator<Item = (usize, &Region)> {
        self.regions.iter().enumerate().filter(|(_, r)| r.is_query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::SqlStatement;

    #[test]
    fn test_recognize_two_word_clauses() {
        let stmt = SqlStatement::new("GROUP BY ORDER BY UNION ALL ORDER x");
        let tokens = stmt.tokens();
        assert_eq!(recognize(tokens, 0), Some((MarkKind::Clause(Clause::GroupBy), 2)));
        assert_eq!(recognize(tokens, 2), Some((MarkKind::Clause(Clause::OrderBy), 2)));
        assert_eq!(recognize(tokens, 4), Some((MarkKind::SetOperator, 2)));
        assert_eq!(recognize(tokens, 6), None);
    }

    #[test]
    fn test_regions_separate_subqueries() {
        let stmt = SqlStatement::new(
            "SELECT a FROM t WHERE a IN (SELECT b FROM u WHERE c = 1) ORDER BY a",
        );
        let layout = ClauseLayout::build(stmt.tokens());
        assert_eq!(layout.regions.len(), 2);
        let top: Vec<Option<Clause>> = layout.regions[0].marks.iter().map(|m| m.clause()).collect();
        assert_eq!(
            top,
            vec![
                Some(Clause::Select),
                Some(Clause::From),
                Some(Clause::Where),
                Some(Clause::OrderBy)
            ]
        );
        assert!(layout.regions[1].is_query);
        assert_eq!(layout.regions[1].marks.len(), 3);
        assert_eq!(layout.token_region.len(), stmt.tokens().len());
    }

    #[test]
    fn test_function_parens_are_not_queries() {
        let stmt = SqlStatement::new("SELECT COUNT(DISTINCT a) FROM t");
        let layout = ClauseLayout::build(stmt.tokens());
        assert!(!layout.regions[1].is_query);
    }

    #[test]
    fn test_body_end_excludes_semicolon() {
        let stmt = SqlStatement::new("SELECT a FROM t;");
        let layout = ClauseLayout::build(stmt.tokens());
        let region = &layout.regions[0];
        assert_eq!(region.body_end(1, stmt.tokens()), 4);
    }
}
