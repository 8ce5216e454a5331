//! Structural reference extraction
//!
//! Splits a statement into query blocks (one per SELECT: top level, set
//! operation branches, subqueries, CTE bodies) and collects the table and
//! column references of each. This is not a SQL parser; it only recovers
//! enough structure to know FROM/JOIN targets and where columns appear.

use crate::grammar::clauses::{Clause, ClauseLayout, ClauseMark};
use crate::statement::{SqlStatement, Token, TokenKind};
use std::collections::HashMap;

pub const AGGREGATES: &[&str] = &["AVG", "COUNT", "GROUP_CONCAT", "MAX", "MIN", "SUM", "TOTAL"];

/// Niladic built-ins that look like column names
const BUILTIN_VALUES: &[&str] = &["CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP"];

const COMPARISONS: &[&str] = &["=", "==", "<>", "!=", "<", ">", "<=", ">="];

const EQUALITIES: &[&str] = &["=", "==", "<>", "!="];

fn is_equality(token: &Token) -> bool {
    token.kind == TokenKind::Operator && EQUALITIES.contains(&token.text.as_str())
}

/// Where in a query block a reference appears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    Select,
    From,
    On,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Other,
}

impl From<Clause> for Context {
    fn from(clause: Clause) -> Self {
        match clause {
            Clause::Select => Context::Select,
            Clause::From => Context::From,
            Clause::Where => Context::Where,
            Clause::GroupBy => Context::GroupBy,
            Clause::Having => Context::Having,
            Clause::OrderBy => Context::OrderBy,
            Clause::With | Clause::Limit | Clause::Offset => Context::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    /// Unquoted name; for a derived table, its alias (or empty)
    pub name: String,
    /// Text as written, including quotes
    pub raw: String,
    pub alias: Option<String>,
    pub offset: usize,
    /// A parenthesized subquery rather than a named table
    pub derived: bool,
    /// Added to FROM after a comma rather than a JOIN
    pub comma_joined: bool,
}

impl TableRef {
    /// Name the rest of the block uses to qualify columns
    pub fn visible_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub qualifier_offset: Option<usize>,
    pub name: String,
    pub raw: String,
    pub offset: usize,
    pub context: Context,
    /// Inside the argument list of an aggregate call
    pub in_aggregate: bool,
    /// Zero-based select-list item holding the reference
    pub select_item: Option<usize>,
}

impl ColumnRef {
    pub fn text(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}.{}", q, self.name),
            None => self.name.clone(),
        }
    }

    /// Offset where the reference starts (the qualifier, if any)
    pub fn start(&self) -> usize {
        self.qualifier_offset.unwrap_or(self.offset)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub name: String,
    pub offset: usize,
    pub context: Context,
}

/// A column compared with a literal
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Index into the block's columns
    pub column: usize,
    pub literal: String,
    pub literal_kind: TokenKind,
}

/// `= NULL`, `<> NULL` and friends
#[derive(Debug, Clone, PartialEq)]
pub struct NullComparison {
    /// Offset of the operator
    pub offset: usize,
    pub operator: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueryBlock {
    pub region: usize,
    /// Block of the enclosing query, for correlated references
    pub parent: Option<usize>,
    /// CTE names visible to this block
    pub ctes: Vec<String>,
    pub tables: Vec<TableRef>,
    pub columns: Vec<ColumnRef>,
    pub select_aliases: Vec<String>,
    pub has_group_by: bool,
    pub having_offset: Option<usize>,
    /// 1-based select positions named in GROUP BY
    pub group_ordinals: Vec<usize>,
    pub aggregates: Vec<AggregateCall>,
    pub comparisons: Vec<Comparison>,
    /// Pairs of column indices equated in an ON condition
    pub join_pairs: Vec<(usize, usize)>,
    pub null_comparisons: Vec<NullComparison>,
    /// Column-to-column equalities in WHERE
    pub where_links: usize,
}

impl QueryBlock {
    /// Grouped by GROUP BY or by an aggregate in the select list / HAVING
    pub fn is_aggregated(&self) -> bool {
        self.has_group_by
            || self
                .aggregates
                .iter()
                .any(|a| matches!(a.context, Context::Select | Context::Having))
    }

    pub fn has_cte(&self, name: &str) -> bool {
        self.ctes.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn has_select_alias(&self, name: &str) -> bool {
        self.select_aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

pub fn extract(statement: &SqlStatement) -> Vec<QueryBlock> {
    Structure::new(statement.tokens()).blocks()
}

struct Structure<'a> {
    tokens: &'a [Token],
    layout: ClauseLayout,
    parent_region: Vec<Option<usize>>,
    /// Query region owning each token
    owner: Vec<usize>,
    /// `(` token -> region it opens
    open_region: HashMap<usize, usize>,
}

impl<'a> Structure<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        let layout = ClauseLayout::build(tokens);
        let parent_region: Vec<Option<usize>> = layout
            .regions
            .iter()
            .map(|r| r.open_token.and_then(|o| layout.token_region.get(o).copied()))
            .collect();
        let open_region = layout
            .regions
            .iter()
            .enumerate()
            .filter_map(|(id, r)| r.open_token.map(|o| (o, id)))
            .collect();

        let mut structure = Self {
            tokens,
            layout,
            parent_region,
            owner: Vec::new(),
            open_region,
        };
        let owner = structure
            .layout
            .token_region
            .iter()
            .map(|r| structure.query_owner(*r))
            .collect();
        structure.owner = owner;
        structure
    }

    fn query_owner(&self, mut region: usize) -> usize {
        while !self.layout.regions[region].is_query {
            match self.parent_region[region] {
                Some(parent) => region = parent,
                None => break,
            }
        }
        region
    }

    fn region_end(&self, region: usize) -> usize {
        self.layout.regions[region]
            .close_token
            .unwrap_or(self.tokens.len())
    }

    /// (region, first token, end token) of every block
    fn spans(&self) -> Vec<(usize, usize, usize)> {
        let mut spans = Vec::new();
        for (id, region) in self.layout.query_regions() {
            let end = self.region_end(id);
            let mut open: Option<usize> = None;
            for mark in &region.marks {
                match mark.clause() {
                    None => {
                        if let Some(start) = open.take() {
                            spans.push((id, start, mark.token));
                        }
                    }
                    Some(Clause::Select) if open.is_none() => open = Some(mark.token),
                    _ => {}
                }
            }
            if let Some(start) = open {
                spans.push((id, start, end));
            }
        }
        spans
    }

    fn cte_names(&self, region: usize) -> Vec<String> {
        let layout = &self.layout;
        let mut names = Vec::new();
        let mut current = Some(region);
        while let Some(id) = current {
            let r = &layout.regions[id];
            if let Some(with) = r.marks.first().filter(|m| m.clause() == Some(Clause::With)) {
                let end = r.body_end(0, self.tokens);
                for j in with.body_start..end {
                    let token = &self.tokens[j];
                    if layout.token_region[j] != id || !token.is_name() {
                        continue;
                    }
                    let next = self.tokens.get(j + 1);
                    if next.map_or(false, |n| n.is_keyword("AS") || n.kind == TokenKind::LParen) {
                        names.push(token.name());
                    }
                }
            }
            current = self.parent_region[id];
        }
        names
    }

    fn blocks(&self) -> Vec<QueryBlock> {
        let spans = self.spans();
        let block_of = |i: usize| {
            let region = self.owner[i];
            spans
                .iter()
                .position(|(r, start, end)| *r == region && *start <= i && i < *end)
        };

        spans
            .iter()
            .map(|(region, start, end)| {
                let parent = self.layout.regions[*region].open_token.and_then(|o| block_of(o));
                let mut block = BlockParser::new(self, *region, *start, *end).run();
                block.parent = parent;
                block.ctes = self.cte_names(*region);
                block
            })
            .collect()
    }
}

struct BlockParser<'s, 'a> {
    s: &'s Structure<'a>,
    region: usize,
    start: usize,
    end: usize,
    marks: HashMap<usize, &'s ClauseMark>,
    block: QueryBlock,
    context: Context,
    expect_table: bool,
    in_on: bool,
    after_comma: bool,
    select_item: usize,
    /// Close-paren indices of the aggregate calls currently open
    aggregate_until: Vec<usize>,
    /// Left side of an `a.x = b.y` waiting for its right side
    pending_join: Option<(usize, usize)>,
}

impl<'s, 'a> BlockParser<'s, 'a> {
    fn new(s: &'s Structure<'a>, region: usize, start: usize, end: usize) -> Self {
        let marks = s.layout.regions[region]
            .marks
            .iter()
            .filter(|m| m.token >= start && m.token < end)
            .map(|m| (m.token, m))
            .collect();
        Self {
            s,
            region,
            start,
            end,
            marks,
            block: QueryBlock {
                region,
                ..QueryBlock::default()
            },
            context: Context::Other,
            expect_table: false,
            in_on: false,
            after_comma: false,
            select_item: 0,
            aggregate_until: Vec::new(),
            pending_join: None,
        }
    }

    fn token(&self, i: usize) -> Option<&'a Token> {
        self.s.tokens.get(i)
    }

    /// Token sits directly in this block, not inside a function or list
    fn at_level(&self, i: usize) -> bool {
        self.s.layout.token_region.get(i) == Some(&self.region)
    }

    fn close_of(&self, open: usize) -> Option<usize> {
        let region = self.s.open_region.get(&open)?;
        self.s.layout.regions[*region].close_token
    }

    fn run(mut self) -> QueryBlock {
        let mut j = self.start;
        while j < self.end {
            if self.s.owner[j] != self.region {
                j += 1;
                continue;
            }
            if let Some(mark) = self.marks.get(&j).copied() {
                if let Some(clause) = mark.clause() {
                    self.context = Context::from(clause);
                    if clause == Clause::From {
                        self.expect_table = true;
                        self.in_on = false;
                    }
                    if clause == Clause::GroupBy {
                        self.block.has_group_by = true;
                    }
                    if clause == Clause::Having {
                        self.block.having_offset = Some(mark.offset);
                    }
                }
                j = mark.body_start;
                continue;
            }
            self.aggregate_until.retain(|close| *close > j);

            j = match self.context {
                Context::From if !self.in_on => self.from_item(j),
                Context::From => self.on_token(j),
                Context::Other => j + 1,
                ctx => self.expression(j, ctx),
            };
        }
        self.block
    }

    fn from_item(&mut self, j: usize) -> usize {
        let tokens = self.s.tokens;
        let token = &tokens[j];
        match token.kind {
            TokenKind::Keyword if token.is_keyword("JOIN") => {
                self.expect_table = true;
                self.after_comma = false;
                j + 1
            }
            TokenKind::Keyword if token.is_keyword("ON") => {
                self.in_on = true;
                j + 1
            }
            TokenKind::Keyword if token.is_keyword("USING") => {
                match self.token(j + 1).filter(|t| t.kind == TokenKind::LParen) {
                    Some(_) => self.close_of(j + 1).map_or(j + 2, |c| c + 1),
                    None => j + 1,
                }
            }
            TokenKind::Comma if self.at_level(j) => {
                self.expect_table = true;
                self.after_comma = true;
                j + 1
            }
            TokenKind::LParen if self.expect_table => {
                let is_query = self
                    .s
                    .open_region
                    .get(&j)
                    .map_or(false, |r| self.s.layout.regions[*r].is_query);
                if !is_query {
                    return j + 1;
                }
                let after = self.close_of(j).map_or(self.end, |c| c + 1);
                let (alias, next) = self.alias_at(after);
                self.block.tables.push(TableRef {
                    name: alias.clone().unwrap_or_default(),
                    raw: String::new(),
                    alias,
                    offset: token.offset,
                    derived: true,
                    comma_joined: std::mem::take(&mut self.after_comma),
                });
                self.expect_table = false;
                next
            }
            TokenKind::Identifier | TokenKind::QuotedIdentifier if self.expect_table => {
                let mut last = j;
                while self.token(last + 1).map_or(false, |t| t.kind == TokenKind::Dot)
                    && self.token(last + 2).map_or(false, Token::is_name)
                {
                    last += 2;
                }
                let name_token = &tokens[last];
                let (alias, next) = self.alias_at(last + 1);
                self.block.tables.push(TableRef {
                    name: name_token.name(),
                    raw: name_token.text.clone(),
                    alias,
                    offset: name_token.offset,
                    derived: false,
                    comma_joined: std::mem::take(&mut self.after_comma),
                });
                self.expect_table = false;
                next
            }
            _ => j + 1,
        }
    }

    fn on_token(&mut self, j: usize) -> usize {
        let tokens = self.s.tokens;
        let token = &tokens[j];
        if token.is_keyword("JOIN") || (token.kind == TokenKind::Comma && self.at_level(j)) {
            self.in_on = false;
            self.expect_table = true;
            self.after_comma = token.kind == TokenKind::Comma;
            return j + 1;
        }
        self.expression(j, Context::On)
    }

    fn alias_at(&self, k: usize) -> (Option<String>, usize) {
        match self.token(k) {
            Some(t) if t.is_keyword("AS") => match self.token(k + 1).filter(|n| n.is_name()) {
                Some(name) => (Some(name.name()), k + 2),
                None => (None, k + 1),
            },
            Some(t) if t.is_name() && k < self.end => (Some(t.name()), k + 1),
            _ => (None, k),
        }
    }

    fn expression(&mut self, j: usize, ctx: Context) -> usize {
        let tokens = self.s.tokens;
        let token = &tokens[j];
        let prev = j.checked_sub(1).and_then(|p| self.token(p));
        let next = self.token(j + 1);

        match token.kind {
            TokenKind::Comma if ctx == Context::Select && self.at_level(j) => {
                self.select_item += 1;
                j + 1
            }
            TokenKind::Number if ctx == Context::GroupBy && self.at_level(j) => {
                let leads_item =
                    prev.map_or(false, |p| p.kind == TokenKind::Comma || p.is_keyword("BY"));
                if leads_item {
                    if let Ok(position) = token.text.parse::<usize>() {
                        self.block.group_ordinals.push(position);
                    }
                }
                j + 1
            }
            TokenKind::Keyword if token.is_keyword("NULL") => {
                let operator = prev
                    .filter(|p| is_equality(p))
                    .or_else(|| next.filter(|n| is_equality(n)));
                if let Some(op) = operator {
                    self.block.null_comparisons.push(NullComparison {
                        offset: op.offset,
                        operator: op.text.clone(),
                    });
                }
                j + 1
            }
            TokenKind::Identifier | TokenKind::QuotedIdentifier => {
                if next.map_or(false, |n| n.kind == TokenKind::LParen) {
                    self.function_call(j, ctx);
                    return j + 1;
                }
                if prev.map_or(false, |p| p.is_keyword("AS")) {
                    if ctx == Context::Select && self.at_level(j) {
                        self.block.select_aliases.push(token.name());
                    }
                    return j + 1;
                }
                if token.upper() == "PARTITION" && next.map_or(false, |n| n.is_keyword("BY")) {
                    return j + 1;
                }
                if ctx == Context::Select && self.is_bare_alias(j) {
                    self.block.select_aliases.push(token.name());
                    return j + 1;
                }
                self.column_ref(j, ctx)
            }
            _ => j + 1,
        }
    }

    fn function_call(&mut self, j: usize, ctx: Context) {
        let tokens = self.s.tokens;
        let token = &tokens[j];
        let name = token.upper();
        if !AGGREGATES.contains(&name.as_str()) {
            return;
        }
        let close = self.close_of(j + 1);
        let windowed = close
            .and_then(|c| self.token(c + 1))
            .map_or(false, |t| t.text.eq_ignore_ascii_case("OVER"));
        if windowed {
            return;
        }
        if let Some(close) = close {
            self.aggregate_until.push(close);
        }
        self.block.aggregates.push(AggregateCall {
            name,
            offset: token.offset,
            context: ctx,
        });
    }

    /// `SELECT salary s` or `SELECT COUNT(*) total`
    fn is_bare_alias(&self, j: usize) -> bool {
        if !self.at_level(j) || j == 0 {
            return false;
        }
        let prev = &self.s.tokens[j - 1];
        let ends_expression = matches!(
            prev.kind,
            TokenKind::Identifier
                | TokenKind::QuotedIdentifier
                | TokenKind::RParen
                | TokenKind::Number
                | TokenKind::StringLiteral
        ) || prev.is_keyword("END");
        let ends_item = match self.token(j + 1) {
            None => true,
            Some(n) => {
                n.kind == TokenKind::Comma
                    || n.kind == TokenKind::Semicolon
                    || self.marks.contains_key(&(j + 1))
                    || j + 1 >= self.end
            }
        };
        ends_expression && self.at_level(j - 1) && ends_item
    }

    fn column_ref(&mut self, j: usize, ctx: Context) -> usize {
        let tokens = self.s.tokens;
        let token = &tokens[j];
        let dotted = self.token(j + 1).map_or(false, |t| t.kind == TokenKind::Dot);

        let (qualifier, column_idx) = if dotted {
            match self.token(j + 2) {
                Some(t) if t.is_name() || t.kind == TokenKind::Keyword => {
                    // schema.table.column keeps the table as qualifier
                    let three_part = self.token(j + 3).map_or(false, |t| t.kind == TokenKind::Dot)
                        && self.token(j + 4).map_or(false, Token::is_name);
                    if three_part {
                        (Some(&tokens[j + 2]), j + 4)
                    } else {
                        (Some(token), j + 2)
                    }
                }
                // q.* or a dangling dot
                _ => return j + 3,
            }
        } else {
            if BUILTIN_VALUES.contains(&token.upper().as_str()) {
                return j + 1;
            }
            (None, j)
        };

        let column = &tokens[column_idx];
        let index = self.block.columns.len();
        self.block.columns.push(ColumnRef {
            qualifier: qualifier.map(Token::name),
            qualifier_offset: qualifier.map(|q| q.offset),
            name: column.name(),
            raw: column.text.clone(),
            offset: column.offset,
            context: ctx,
            in_aggregate: !self.aggregate_until.is_empty(),
            select_item: (ctx == Context::Select).then_some(self.select_item),
        });

        self.record_comparison(index, j, column_idx);
        if ctx == Context::On && qualifier.is_some() {
            self.record_join(index, j, column_idx);
        }
        if ctx == Context::Where && self.equates_column(column_idx) {
            self.block.where_links += 1;
        }
        column_idx + 1
    }

    fn record_comparison(&mut self, index: usize, first: usize, last: usize) {
        let is_cmp = |t: Option<&Token>| {
            t.map_or(false, |t| t.kind == TokenKind::Operator && COMPARISONS.contains(&t.text.as_str()))
        };
        let literal = |t: Option<&'a Token>| {
            t.filter(|t| matches!(t.kind, TokenKind::StringLiteral | TokenKind::Number))
        };

        let found = if is_cmp(self.token(last + 1)) {
            literal(self.token(last + 2))
        } else if first >= 2 && is_cmp(self.token(first - 1)) {
            literal(self.token(first - 2))
        } else {
            None
        };
        if let Some(lit) = found {
            self.block.comparisons.push(Comparison {
                column: index,
                literal: lit.text.clone(),
                literal_kind: lit.kind,
            });
        }
    }

    /// `x = y` or `x = t.y`, with a column rather than a call on the right
    fn equates_column(&self, last: usize) -> bool {
        let equals = self
            .token(last + 1)
            .map_or(false, |t| t.text == "=" || t.text == "==");
        equals
            && self.token(last + 2).map_or(false, Token::is_name)
            && self
                .token(last + 3)
                .map_or(true, |t| t.kind != TokenKind::LParen)
    }

    fn record_join(&mut self, index: usize, first: usize, last: usize) {
        if let Some((left, expected)) = self.pending_join.take() {
            if expected == first {
                self.block.join_pairs.push((left, index));
                return;
            }
        }
        let equated = self.token(last + 1).map_or(false, |t| t.text == "=")
            && self.token(last + 2).map_or(false, Token::is_name)
            && self.token(last + 3).map_or(false, |t| t.kind == TokenKind::Dot);
        if equated {
            self.pending_join = Some((index, last + 2));
        }
    }
}
