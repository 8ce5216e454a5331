use super::clauses::ClauseLayout;
use crate::statement::{SqlStatement, TokenKind};
use std::collections::HashSet;

/// Canonical layout of a structurally valid statement: keywords upper-cased,
/// single spaces between tokens and every top-level clause on its own line.
pub fn format(statement: &SqlStatement) -> String {
    let tokens = statement.tokens();
    let layout = ClauseLayout::build(tokens);
    let line_starts: HashSet<usize> = layout.regions[0]
        .marks
        .iter()
        .map(|m| m.token)
        .filter(|&i| i > 0)
        .collect();

    let mut out = String::with_capacity(statement.text().len());
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            let prev = &tokens[i - 1];
            if line_starts.contains(&i) {
                out.push('\n');
            } else if needs_space(prev.kind, token.kind) {
                out.push(' ');
            }
        }
        match token.kind {
            TokenKind::Keyword => out.push_str(&token.upper()),
            _ => out.push_str(&token.text),
        }
    }
    out
}

fn needs_space(prev: TokenKind, next: TokenKind) -> bool {
    use TokenKind::*;
    match (prev, next) {
        (_, Comma | RParen | Dot | Semicolon) => false,
        (LParen | Dot, _) => false,
        (Identifier | QuotedIdentifier, LParen) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_layout() {
        let stmt = SqlStatement::new("select e.name , count( * ) from employees e  where e.id in (1,2) group by e.name;");
        assert_eq!(
            format(&stmt),
            "SELECT e.name, count(*)\nFROM employees e\nWHERE e.id IN (1, 2)\nGROUP BY e.name;"
        );
    }

    #[test]
    fn test_subquery_stays_inline() {
        let stmt = SqlStatement::new("SELECT a FROM t WHERE a IN (SELECT b FROM u)");
        assert_eq!(
            format(&stmt),
            "SELECT a\nFROM t\nWHERE a IN (SELECT b FROM u)"
        );
    }

    #[test]
    fn test_formatting_is_stable() {
        let stmt = SqlStatement::new("SELECT  *  FROM   t");
        let once = format(&stmt);
        assert_eq!(format(&SqlStatement::new(once.clone())), once);
    }
}
