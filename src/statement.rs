//! SQL Statement
//!
//! Immutable statement text with a lazily computed token sequence. Repairs
//! never mutate a statement; `with_edit` produces a new one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Words the tokenizer classifies as keywords rather than identifiers.
/// Function names (COUNT, SUM, ...) and type names are left as identifiers.
const KEYWORDS: &[&str] = &[
    "ALL", "ALTER", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CAST", "COLLATE", "CREATE",
    "CROSS", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS",
    "FALSE", "FIRST", "FROM", "FULL", "GLOB", "GROUP", "HAVING", "IN", "INDEX", "INNER",
    "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "LAST", "LEFT", "LIKE", "LIMIT", "NATURAL",
    "NOT", "NULL", "NULLS", "OFFSET", "ON", "OR", "ORDER", "OUTER", "RECURSIVE", "RIGHT",
    "SELECT", "SET", "TABLE", "THEN", "TRUE", "UNION", "UPDATE", "USING", "VALUES", "VIEW",
    "WHEN", "WHERE", "WITH",
];

pub fn is_keyword(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    KEYWORDS.binary_search(&upper.as_str()).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Keyword,
    Identifier,
    QuotedIdentifier,
    StringLiteral,
    Number,
    Parameter,
    Operator,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Star,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offset into the statement text
    pub offset: usize,
    /// Parenthesis depth; a `(` and its matching `)` share the outer depth
    pub depth: usize,
    /// False for a string literal or quoted identifier missing its closing quote
    pub terminated: bool,
}

impl Token {
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_word(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Keyword | TokenKind::Identifier | TokenKind::QuotedIdentifier
        )
    }

    pub fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Identifier | TokenKind::QuotedIdentifier)
    }

    /// Identifier text with surrounding quotes removed
    pub fn name(&self) -> String {
        if self.kind != TokenKind::QuotedIdentifier {
            return self.text.clone();
        }
        let inner = self.text.get(1..).unwrap_or_default();
        let inner = if self.terminated {
            inner.get(..inner.len().saturating_sub(1)).unwrap_or_default()
        } else {
            inner
        };
        inner.replace("\"\"", "\"")
    }

    pub fn upper(&self) -> String {
        self.text.to_ascii_uppercase()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SqlStatement {
    text: String,
    tokens: OnceLock<Vec<Token>>,
}

impl SqlStatement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens: OnceLock::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[Token] {
        self.tokens.get_or_init(|| tokenize(&self.text))
    }

    pub fn is_blank(&self) -> bool {
        self.tokens().is_empty()
    }

    /// New statement with `remove_len` bytes at `offset` replaced by `insert`.
    /// Returns `None` when the range is out of bounds or splits a character.
    pub fn with_edit(&self, offset: usize, remove_len: usize, insert: &str) -> Option<SqlStatement> {
        let end = offset.checked_add(remove_len)?;
        if end > self.text.len()
            || !self.text.is_char_boundary(offset)
            || !self.text.is_char_boundary(end)
        {
            return None;
        }
        let mut text = String::with_capacity(self.text.len() + insert.len());
        text.push_str(&self.text[..offset]);
        text.push_str(insert);
        text.push_str(&self.text[end..]);
        Some(SqlStatement::new(text))
    }

    /// Byte offset just past the last meaningful token (before a trailing `;`)
    pub fn body_end(&self) -> usize {
        self.tokens()
            .iter()
            .rev()
            .find(|t| t.kind != TokenKind::Semicolon)
            .map(|t| t.end())
            .unwrap_or(0)
    }

    /// First token of a second statement, i.e. anything but `;` after a
    /// top-level `;`
    pub fn trailing_statement(&self) -> Option<&Token> {
        let tokens = self.tokens();
        let split = tokens
            .iter()
            .position(|t| t.kind == TokenKind::Semicolon && t.depth == 0)?;
        tokens[split + 1..]
            .iter()
            .find(|t| t.kind != TokenKind::Semicolon)
    }
}

impl PartialEq for SqlStatement {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for SqlStatement {}

impl From<String> for SqlStatement {
    fn from(text: String) -> Self {
        SqlStatement::new(text)
    }
}

impl From<&str> for SqlStatement {
    fn from(text: &str) -> Self {
        SqlStatement::new(text)
    }
}

impl From<SqlStatement> for String {
    fn from(statement: SqlStatement) -> Self {
        statement.text
    }
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let byte_at = |i: usize| chars.get(i).map(|(b, _)| *b).unwrap_or(text.len());
    let char_at = |i: usize| chars.get(i).map(|(_, c)| *c);

    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while let Some(c) = char_at(i) {
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comments
        if c == '-' && char_at(i + 1) == Some('-') {
            while let Some(n) = char_at(i) {
                if n == '\n' {
                    break;
                }
                i += 1;
            }
            continue;
        }
        if c == '/' && char_at(i + 1) == Some('*') {
            i += 2;
            while let Some(n) = char_at(i) {
                if n == '*' && char_at(i + 1) == Some('/') {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }

        let (kind, terminated) = match c {
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                i += 1;
                let mut terminated = false;
                while let Some(n) = char_at(i) {
                    i += 1;
                    if n == close {
                        // doubled quote is an escape
                        if close != ']' && char_at(i) == Some(close) {
                            i += 1;
                            continue;
                        }
                        terminated = true;
                        break;
                    }
                }
                let kind = if c == '\'' {
                    TokenKind::StringLiteral
                } else {
                    TokenKind::QuotedIdentifier
                };
                (kind, terminated)
            }
            '(' => {
                i += 1;
                (TokenKind::LParen, true)
            }
            ')' => {
                i += 1;
                (TokenKind::RParen, true)
            }
            ',' => {
                i += 1;
                (TokenKind::Comma, true)
            }
            ';' => {
                i += 1;
                (TokenKind::Semicolon, true)
            }
            '*' => {
                i += 1;
                (TokenKind::Star, true)
            }
            '.' if !char_at(i + 1).map_or(false, |n| n.is_ascii_digit()) => {
                i += 1;
                (TokenKind::Dot, true)
            }
            '?' | ':' | '@' | '$' => {
                i += 1;
                while char_at(i).map_or(false, |n| n.is_alphanumeric() || n == '_') {
                    i += 1;
                }
                if i - start == 1 && c != '?' {
                    (TokenKind::Operator, true)
                } else {
                    (TokenKind::Parameter, true)
                }
            }
            d if d.is_ascii_digit() || d == '.' => {
                i += 1;
                let mut seen_exponent = false;
                while let Some(n) = char_at(i) {
                    if n.is_ascii_digit() || n == '.' {
                        i += 1;
                    } else if (n == 'e' || n == 'E') && !seen_exponent {
                        seen_exponent = true;
                        i += 1;
                        if matches!(char_at(i), Some('+') | Some('-')) {
                            i += 1;
                        }
                    } else {
                        break;
                    }
                }
                (TokenKind::Number, true)
            }
            w if w.is_alphanumeric() || w == '_' => {
                while char_at(i).map_or(false, |n| n.is_alphanumeric() || n == '_' || n == '$') {
                    i += 1;
                }
                let word = &text[byte_at(start)..byte_at(i)];
                if is_keyword(word) {
                    (TokenKind::Keyword, true)
                } else {
                    (TokenKind::Identifier, true)
                }
            }
            _ => {
                i += 1;
                // two-character operators
                if let Some(n) = char_at(i) {
                    let pair = [c, n];
                    if matches!(
                        pair,
                        ['<', '='] | ['>', '='] | ['<', '>'] | ['!', '='] | ['=', '='] | ['|', '|']
                            | ['<', '<'] | ['>', '>']
                    ) {
                        i += 1;
                    }
                }
                (TokenKind::Operator, true)
            }
        };

        let token_depth = match kind {
            TokenKind::LParen => {
                let d = depth;
                depth += 1;
                d
            }
            TokenKind::RParen => {
                depth = depth.saturating_sub(1);
                depth
            }
            _ => depth,
        };

        let offset = byte_at(start);
        tokens.push(Token {
            kind,
            text: text[offset..byte_at(i)].to_string(),
            offset,
            depth: token_depth,
            terminated,
        });
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        SqlStatement::new(sql).tokens().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_are_sorted() {
        let mut sorted = KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, KEYWORDS);
    }

    #[test]
    fn test_tokenize_basic_select() {
        let stmt = SqlStatement::new("SELECT e.name, COUNT(*) FROM employees e WHERE salary >= 50000");
        let tokens = stmt.tokens();
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].text, "e");
        assert_eq!(tokens[2].kind, TokenKind::Dot);
        assert_eq!(tokens[5].text, "COUNT");
        assert_eq!(tokens[5].kind, TokenKind::Identifier);
        assert_eq!(tokens[7].kind, TokenKind::Star);
        assert_eq!(tokens[7].depth, 1);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Operator && t.text == ">="));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Number);
    }

    #[test]
    fn test_offsets_and_depth() {
        let stmt = SqlStatement::new("SELECT (a + (b))");
        let tokens = stmt.tokens();
        let parens: Vec<(usize, usize)> = tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::LParen | TokenKind::RParen))
            .map(|t| (t.offset, t.depth))
            .collect();
        assert_eq!(parens, vec![(7, 0), (12, 1), (14, 1), (15, 0)]);
    }

    #[test]
    fn test_strings_and_comments() {
        assert_eq!(
            kinds("SELECT 'it''s' -- trailing\n FROM t /* block */"),
            vec![
                TokenKind::Keyword,
                TokenKind::StringLiteral,
                TokenKind::Keyword,
                TokenKind::Identifier
            ]
        );
        let stmt = SqlStatement::new("SELECT 'open");
        assert!(!stmt.tokens()[1].terminated);
    }

    #[test]
    fn test_quoted_identifier_name() {
        let stmt = SqlStatement::new(r#"SELECT "order" FROM t"#);
        assert_eq!(stmt.tokens()[1].kind, TokenKind::QuotedIdentifier);
        assert_eq!(stmt.tokens()[1].name(), "order");
    }

    #[test]
    fn test_with_edit_produces_new_statement() {
        let stmt = SqlStatement::new("SELECT * FROM t WHERE (a > 1");
        let fixed = stmt.with_edit(stmt.text().len(), 0, ")").unwrap();
        assert_eq!(fixed.text(), "SELECT * FROM t WHERE (a > 1)");
        assert_eq!(stmt.text(), "SELECT * FROM t WHERE (a > 1");
        assert!(stmt.with_edit(100, 0, ")").is_none());
    }

    #[test]
    fn test_body_end_skips_semicolon() {
        let stmt = SqlStatement::new("SELECT 1;  ");
        assert_eq!(stmt.body_end(), 8);
    }

    #[test]
    fn test_trailing_statement() {
        let stmt = SqlStatement::new("SELECT name FROM employees; DROP TABLE employees");
        let extra = stmt.trailing_statement().unwrap();
        assert_eq!(extra.text, "DROP");
        assert_eq!(extra.offset, 28);

        assert!(SqlStatement::new("SELECT 1;;  -- done\n").trailing_statement().is_none());
        assert!(SqlStatement::new("SELECT ';' || x FROM t").trailing_statement().is_none());
    }

    #[test]
    fn test_serde_as_plain_string() {
        let stmt = SqlStatement::new("SELECT 1");
        let json = serde_json::to_string(&stmt).unwrap();
        assert_eq!(json, "\"SELECT 1\"");
        let back: SqlStatement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stmt);
    }
}
