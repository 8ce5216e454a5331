//! Schema Verifier
//!
//! Resolves the table and column references recovered by [`extract`] against
//! a [`SchemaModel`], block by block with correlated references falling back
//! to enclosing blocks, and checks grouping, aggregate placement, literal
//! comparisons and join predicates. NULL equality, HAVING without GROUP BY
//! and comma joins with no predicate are reported as warnings.

pub mod extract;

use crate::config::VerifierConfig;
use crate::matcher::NameMatcher;
use crate::schema::{ColumnDef, ColumnPath, SchemaModel, TableDef, TypeClass};
use crate::stage::{ColumnBinding, StageArtifacts, StageResult, TableBinding};
use crate::statement::{SqlStatement, TokenKind};
use crate::taxonomy::{ErrorKind, Finding, RepairHint, Stage};
use extract::{ColumnRef, Context, QueryBlock};
use itertools::Itertools;
use tracing::debug;

/// What a visible table name stands for
#[derive(Debug, Clone, Copy)]
enum Source<'s> {
    Table(&'s TableDef),
    /// CTE, derived table or unknown table: any column is accepted
    Opaque,
}

#[derive(Debug, Clone)]
struct ScopeEntry<'s> {
    visible: String,
    source: Source<'s>,
}

enum Resolution<'s> {
    Bound(&'s TableDef, &'s ColumnDef),
    Ambiguous(Vec<String>),
    /// An opaque source may provide the column
    Unverifiable,
    Missing,
}

pub struct SchemaVerifier {
    matcher: NameMatcher,
}

impl Default for SchemaVerifier {
    fn default() -> Self {
        Self::new(&VerifierConfig::default())
    }
}

impl SchemaVerifier {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            matcher: NameMatcher::new(config.max_suggestion_distance),
        }
    }

    pub fn verify(&self, statement: &SqlStatement, schema: &SchemaModel) -> StageResult {
        let blocks = extract::extract(statement);
        let mut findings = Vec::new();
        let mut table_bindings = Vec::new();
        let mut column_bindings = Vec::new();

        let scopes: Vec<Vec<ScopeEntry>> = blocks
            .iter()
            .map(|block| self.scope(block, schema, &mut findings, &mut table_bindings))
            .collect();

        let session = Session {
            verifier: self,
            schema,
            blocks: &blocks,
            scopes: &scopes,
        };
        for (id, block) in blocks.iter().enumerate() {
            session.check_block(id, block, &mut findings, &mut column_bindings);
        }

        debug!(
            "Schema stage: {} block(s), {} finding(s)",
            blocks.len(),
            findings.len()
        );
        StageResult::new(
            Stage::Schema,
            statement.clone(),
            findings,
            StageArtifacts::Schema {
                tables: table_bindings,
                columns: column_bindings,
            },
        )
    }

    fn scope<'s>(
        &self,
        block: &QueryBlock,
        schema: &'s SchemaModel,
        findings: &mut Vec<Finding>,
        bindings: &mut Vec<TableBinding>,
    ) -> Vec<ScopeEntry<'s>> {
        let mut entries = Vec::with_capacity(block.tables.len());
        for table_ref in &block.tables {
            let visible = table_ref.visible_name().to_string();
            if table_ref.derived || block.has_cte(&table_ref.name) {
                entries.push(ScopeEntry {
                    visible,
                    source: Source::Opaque,
                });
                continue;
            }
            match schema.table(&table_ref.name) {
                Some(table) => {
                    bindings.push(TableBinding {
                        reference: table_ref.name.clone(),
                        table: table.name.clone(),
                        alias: table_ref.alias.clone(),
                        offset: table_ref.offset,
                    });
                    entries.push(ScopeEntry {
                        visible,
                        source: Source::Table(table),
                    });
                }
                None => {
                    findings.push(self.unknown_table(table_ref, schema));
                    entries.push(ScopeEntry {
                        visible,
                        source: Source::Opaque,
                    });
                }
            }
        }
        entries
    }

    fn unknown_table(&self, table_ref: &extract::TableRef, schema: &SchemaModel) -> Finding {
        let candidates = schema.tables().iter().map(|t| t.name.as_str());
        let mut finding = Finding::new(
            ErrorKind::UnknownTable,
            format!("Table '{}' not found in schema", table_ref.name),
        )
        .at(table_ref.offset)
        .subject(table_ref.name.clone());

        if let Some(m) = self.matcher.nearest(&table_ref.name, candidates) {
            finding = finding
                .with_hint(RepairHint::ReplaceIdentifier {
                    offset: table_ref.offset,
                    original: table_ref.raw.clone(),
                    replacement: replacement_text(&table_ref.raw, &m.name),
                    distance: m.distance,
                })
                .with_confidence(m.confidence);
        }
        finding
    }
}

/// Keep the quoting style of the text being replaced
fn replacement_text(raw: &str, name: &str) -> String {
    if raw.starts_with('"') {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

struct Session<'v, 's> {
    verifier: &'v SchemaVerifier,
    schema: &'s SchemaModel,
    blocks: &'v [QueryBlock],
    scopes: &'v [Vec<ScopeEntry<'s>>],
}

impl<'v, 's> Session<'v, 's> {
    fn check_block(
        &self,
        id: usize,
        block: &QueryBlock,
        findings: &mut Vec<Finding>,
        bindings: &mut Vec<ColumnBinding>,
    ) {
        let mut resolved: Vec<Option<(&'s TableDef, &'s ColumnDef)>> =
            Vec::with_capacity(block.columns.len());

        for column in &block.columns {
            let resolution = self.resolve(id, column);
            let binding = match resolution {
                Resolution::Bound(table, def) => {
                    bindings.push(ColumnBinding {
                        reference: column.text(),
                        table: table.name.clone(),
                        column: def.name.clone(),
                        offset: column.start(),
                    });
                    Some((table, def))
                }
                Resolution::Ambiguous(tables) => {
                    findings.push(
                        Finding::new(
                            ErrorKind::AmbiguousColumn,
                            format!(
                                "Column '{}' is ambiguous; it exists in {}",
                                column.name,
                                tables.join(", ")
                            ),
                        )
                        .at(column.offset)
                        .subject(column.name.clone())
                        .with_hint(RepairHint::advice(format!(
                            "qualify the column, e.g. {}.{}",
                            tables[0], column.name
                        ))),
                    );
                    None
                }
                Resolution::Unverifiable => None,
                Resolution::Missing => {
                    findings.push(self.unknown_column(id, column));
                    None
                }
            };
            resolved.push(binding);
        }

        self.check_grouping(block, &resolved, findings);
        self.check_aggregate_placement(block, findings);
        self.check_comparisons(block, &resolved, findings);
        self.check_joins(block, &resolved, findings);
        self.check_null_comparisons(block, findings);
        self.check_having(block, findings);
        self.check_cartesian(block, findings);
    }

    fn lookup(&self, id: usize, qualifier: &str) -> Option<&ScopeEntry<'s>> {
        let mut current = Some(id);
        while let Some(block) = current {
            let found = self.scopes[block]
                .iter()
                .find(|e| e.visible.eq_ignore_ascii_case(qualifier));
            if found.is_some() {
                return found;
            }
            current = self.blocks[block].parent;
        }
        None
    }

    fn resolve(&self, id: usize, column: &ColumnRef) -> Resolution<'s> {
        if let Some(qualifier) = &column.qualifier {
            return match self.lookup(id, qualifier).map(|e| e.source) {
                Some(Source::Table(table)) => match table.column(&column.name) {
                    Some(def) => Resolution::Bound(table, def),
                    None => Resolution::Missing,
                },
                Some(Source::Opaque) => Resolution::Unverifiable,
                None => Resolution::Missing,
            };
        }

        let block = &self.blocks[id];
        let alias_position = matches!(
            column.context,
            Context::GroupBy | Context::Having | Context::OrderBy
        );
        if alias_position && block.has_select_alias(&column.name) {
            return Resolution::Unverifiable;
        }

        let mut current = Some(id);
        while let Some(b) = current {
            let scope = &self.scopes[b];
            let hits: Vec<(&str, &'s TableDef, &'s ColumnDef)> = scope
                .iter()
                .filter_map(|e| match e.source {
                    Source::Table(t) => t.column(&column.name).map(|c| (e.visible.as_str(), t, c)),
                    Source::Opaque => None,
                })
                .collect();
            match hits.as_slice() {
                [(_, table, def)] => return Resolution::Bound(*table, *def),
                [] => {}
                many => {
                    return Resolution::Ambiguous(
                        many.iter().map(|(v, _, _)| v.to_string()).collect(),
                    )
                }
            }
            if scope.iter().any(|e| matches!(e.source, Source::Opaque)) {
                return Resolution::Unverifiable;
            }
            current = self.blocks[b].parent;
        }
        Resolution::Missing
    }

    fn unknown_column(&self, id: usize, column: &ColumnRef) -> Finding {
        if let Some(qualifier) = &column.qualifier {
            if self.lookup(id, qualifier).is_none() {
                return Finding::new(
                    ErrorKind::UnknownColumn,
                    format!(
                        "Unknown table or alias '{}' in reference '{}'",
                        qualifier,
                        column.text()
                    ),
                )
                .at(column.start())
                .subject(column.text());
            }
        }

        // Candidate columns in schema declaration order
        let tables: Vec<&TableDef> = match &column.qualifier {
            Some(q) => match self.lookup(id, q).map(|e| e.source) {
                Some(Source::Table(t)) => vec![t],
                _ => Vec::new(),
            },
            None => self.scopes[id]
                .iter()
                .filter_map(|e| match e.source {
                    Source::Table(t) => Some(t),
                    Source::Opaque => None,
                })
                .sorted_by_key(|t| self.schema.position(&t.name))
                .dedup_by(|a, b| a.name == b.name)
                .collect(),
        };

        let location = match tables.as_slice() {
            [] => "any table in scope".to_string(),
            ts => ts.iter().map(|t| t.name.as_str()).join(", "),
        };
        let mut finding = Finding::new(
            ErrorKind::UnknownColumn,
            format!("Column '{}' not found in {}", column.name, location),
        )
        .at(column.offset)
        .subject(column.name.clone());

        let candidates = tables
            .iter()
            .flat_map(|t| t.columns.iter().map(|c| c.name.as_str()));
        if let Some(m) = self.verifier.matcher.nearest(&column.name, candidates) {
            finding = finding
                .with_hint(RepairHint::ReplaceIdentifier {
                    offset: column.offset,
                    original: column.raw.clone(),
                    replacement: replacement_text(&column.raw, &m.name),
                    distance: m.distance,
                })
                .with_confidence(m.confidence);
        }
        finding
    }

    fn check_grouping(
        &self,
        block: &QueryBlock,
        resolved: &[Option<(&'s TableDef, &'s ColumnDef)>],
        findings: &mut Vec<Finding>,
    ) {
        if !block.is_aggregated() {
            return;
        }
        let keys: Vec<(&ColumnRef, Option<(&TableDef, &ColumnDef)>)> = block
            .columns
            .iter()
            .zip(resolved)
            .filter(|(c, _)| c.context == Context::GroupBy)
            .map(|(c, r)| (c, *r))
            .collect();

        for (column, binding) in block.columns.iter().zip(resolved) {
            if column.context != Context::Select || column.in_aggregate {
                continue;
            }
            let by_position = column
                .select_item
                .map_or(false, |item| block.group_ordinals.contains(&(item + 1)));
            let grouped = by_position
                || keys.iter().any(|(key, key_binding)| match (binding, key_binding) {
                    (Some((t1, c1)), Some((t2, c2))) => t1.name == t2.name && c1.name == c2.name,
                    _ => key.name.eq_ignore_ascii_case(&column.name),
                });
            if grouped {
                continue;
            }
            findings.push(
                Finding::new(
                    ErrorKind::MissingGroupBy,
                    format!(
                        "Column '{}' must appear in GROUP BY or be used in an aggregate function",
                        column.text()
                    ),
                )
                .at(column.start())
                .subject(column.text())
                .with_hint(RepairHint::advice(format!(
                    "add {} to GROUP BY or wrap it in an aggregate",
                    column.text()
                ))),
            );
        }
    }

    fn check_aggregate_placement(&self, block: &QueryBlock, findings: &mut Vec<Finding>) {
        for call in block.aggregates.iter().filter(|a| a.context == Context::Where) {
            findings.push(
                Finding::new(
                    ErrorKind::AggregateInWhere,
                    format!("Aggregate function {} is not allowed in WHERE", call.name),
                )
                .at(call.offset)
                .subject(call.name.clone())
                .with_hint(RepairHint::advice("move the condition to HAVING")),
            );
        }
    }

    fn check_comparisons(
        &self,
        block: &QueryBlock,
        resolved: &[Option<(&'s TableDef, &'s ColumnDef)>],
        findings: &mut Vec<Finding>,
    ) {
        for cmp in &block.comparisons {
            let (table, def) = match resolved.get(cmp.column).copied().flatten() {
                Some(b) => b,
                None => continue,
            };
            let column = &block.columns[cmp.column];
            let mismatch = match (def.type_class(), cmp.literal_kind) {
                (TypeClass::Numeric, TokenKind::StringLiteral) => {
                    let inner = cmp.literal.trim_matches('\'');
                    inner.trim().parse::<f64>().is_err()
                }
                (TypeClass::Text, TokenKind::Number) => true,
                _ => false,
            };
            if mismatch {
                findings.push(
                    Finding::new(
                        ErrorKind::TypeMismatch,
                        format!(
                            "{}.{} ({}) is compared with {}",
                            table.name, def.name, def.data_type, cmp.literal
                        ),
                    )
                    .at(column.start())
                    .subject(column.text()),
                );
            }
        }
    }

    fn check_joins(
        &self,
        block: &QueryBlock,
        resolved: &[Option<(&'s TableDef, &'s ColumnDef)>],
        findings: &mut Vec<Finding>,
    ) {
        for (left, right) in &block.join_pairs {
            let (l, r) = match (
                resolved.get(*left).copied().flatten(),
                resolved.get(*right).copied().flatten(),
            ) {
                (Some(l), Some(r)) => (l, r),
                _ => continue,
            };
            if l.0.name == r.0.name {
                continue;
            }
            let left_path = ColumnPath::new(&l.0.name, &l.1.name);
            let right_path = ColumnPath::new(&r.0.name, &r.1.name);
            if self.schema.has_foreign_key(&left_path, &right_path) {
                continue;
            }
            let predicate = format!(
                "{}.{} = {}.{}",
                l.0.name, l.1.name, r.0.name, r.1.name
            );
            findings.push(
                Finding::new(
                    ErrorKind::UnverifiedJoin,
                    format!("Join predicate {} is not backed by a foreign key", predicate),
                )
                .at(block.columns[*left].start())
                .subject(predicate),
            );
        }
    }

    fn check_null_comparisons(&self, block: &QueryBlock, findings: &mut Vec<Finding>) {
        for cmp in &block.null_comparisons {
            let fix = match cmp.operator.as_str() {
                "<>" | "!=" => "use IS NOT NULL",
                _ => "use IS NULL",
            };
            findings.push(
                Finding::new(
                    ErrorKind::NullComparison,
                    format!(
                        "Comparison with NULL using '{}' at offset {} is never true",
                        cmp.operator, cmp.offset
                    ),
                )
                .at(cmp.offset)
                .subject(cmp.operator.clone())
                .with_hint(RepairHint::advice(fix)),
            );
        }
    }

    fn check_having(&self, block: &QueryBlock, findings: &mut Vec<Finding>) {
        let Some(offset) = block.having_offset else {
            return;
        };
        if block.has_group_by {
            return;
        }
        findings.push(
            Finding::new(ErrorKind::HavingWithoutGroupBy, "HAVING is used without GROUP BY")
                .at(offset)
                .subject("HAVING")
                .with_hint(RepairHint::advice(
                    "add a GROUP BY clause or move the condition to WHERE",
                )),
        );
    }

    fn check_cartesian(&self, block: &QueryBlock, findings: &mut Vec<Finding>) {
        let Some(first) = block.tables.iter().find(|t| t.comma_joined) else {
            return;
        };
        if block.where_links > 0 {
            return;
        }
        let names = block.tables.iter().map(|t| t.visible_name()).join(", ");
        findings.push(
            Finding::new(
                ErrorKind::CartesianProduct,
                format!("Tables {} are combined with no join predicate", names),
            )
            .at(first.offset)
            .subject(names)
            .with_hint(RepairHint::advice(
                "use explicit JOIN syntax with an ON condition",
            )),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ForeignKey;
    use crate::taxonomy::Severity;

    fn schema() -> SchemaModel {
        SchemaModel::new(
            vec![
                TableDef::new("employees")
                    .with_column(ColumnDef::new("id", "INTEGER").not_null())
                    .with_column(ColumnDef::new("name", "TEXT"))
                    .with_column(ColumnDef::new("salary", "REAL"))
                    .with_column(ColumnDef::new("dept_id", "INTEGER")),
                TableDef::new("departments")
                    .with_column(ColumnDef::new("id", "INTEGER").not_null())
                    .with_column(ColumnDef::new("name", "TEXT")),
            ],
            vec![ForeignKey {
                from: ColumnPath::new("employees", "dept_id"),
                to: ColumnPath::new("departments", "id"),
            }],
        )
        .unwrap()
    }

    fn verify(sql: &str) -> StageResult {
        SchemaVerifier::default().verify(&SqlStatement::new(sql), &schema())
    }

    fn kinds(result: &StageResult) -> Vec<ErrorKind> {
        result.findings().iter().map(|f| f.kind).collect()
    }

    #[test]
    fn test_valid_join_binds_everything() {
        let result = verify(
            "SELECT e.name, d.name FROM employees e JOIN departments d ON e.dept_id = d.id \
             WHERE salary > 50000",
        );
        assert!(result.findings().is_empty(), "{:?}", result.findings());
        match result.artifacts() {
            StageArtifacts::Schema { tables, columns } => {
                assert_eq!(tables.len(), 2);
                assert_eq!(tables[0].alias.as_deref(), Some("e"));
                assert!(columns
                    .iter()
                    .any(|c| c.reference == "salary" && c.table == "employees"));
            }
            other => panic!("unexpected artifacts {:?}", other),
        }
    }

    #[test]
    fn test_unknown_table_with_hint() {
        let result = verify("SELECT name FROM emplyees");
        assert_eq!(kinds(&result), vec![ErrorKind::UnknownTable]);
        let finding = &result.findings()[0];
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.offset, Some(17));
        match &finding.hint {
            Some(RepairHint::ReplaceIdentifier {
                replacement,
                distance,
                ..
            }) => {
                assert_eq!(replacement, "employees");
                assert_eq!(*distance, 1);
            }
            other => panic!("unexpected hint {:?}", other),
        }
    }

    #[test]
    fn test_unknown_column_with_hint() {
        let result = verify("SELECT nme FROM employees");
        assert_eq!(kinds(&result), vec![ErrorKind::UnknownColumn]);
        let finding = &result.findings()[0];
        assert_eq!(finding.severity, Severity::Error);
        assert_eq!(finding.confidence, Some(0.75));
        assert!(finding.hint.as_ref().unwrap().to_string().contains("'name'"));
    }

    #[test]
    fn test_unknown_qualifier() {
        let result = verify("SELECT x.name FROM employees e");
        assert_eq!(kinds(&result), vec![ErrorKind::UnknownColumn]);
        assert!(result.findings()[0].hint.is_none());
    }

    #[test]
    fn test_ambiguous_column() {
        let result = verify(
            "SELECT name FROM employees e JOIN departments d ON e.dept_id = d.id",
        );
        assert_eq!(kinds(&result), vec![ErrorKind::AmbiguousColumn]);
        assert!(result.findings()[0].message.contains("e, d"));
    }

    #[test]
    fn test_missing_group_by() {
        let result = verify("SELECT name, COUNT(*) FROM employees");
        assert_eq!(kinds(&result), vec![ErrorKind::MissingGroupBy]);
        assert!(!result.findings()[0].auto_fixable());

        assert!(verify("SELECT name, COUNT(*) FROM employees GROUP BY name")
            .findings()
            .is_empty());
        assert!(verify("SELECT dept_id, AVG(salary) FROM employees GROUP BY 1")
            .findings()
            .is_empty());
    }

    #[test]
    fn test_aggregate_in_where() {
        let result = verify("SELECT name FROM employees WHERE COUNT(id) > 1");
        assert_eq!(kinds(&result), vec![ErrorKind::AggregateInWhere]);
    }

    #[test]
    fn test_type_mismatch_is_warning() {
        let result = verify("SELECT name FROM employees WHERE salary = 'high' AND name = 5");
        assert_eq!(
            kinds(&result),
            vec![ErrorKind::TypeMismatch, ErrorKind::TypeMismatch]
        );
        assert!(result.passed());
        assert!(verify("SELECT name FROM employees WHERE salary > '100'")
            .findings()
            .is_empty());
    }

    #[test]
    fn test_unverified_join() {
        let result = verify(
            "SELECT e.id FROM employees e JOIN departments d ON e.name = d.name",
        );
        assert_eq!(kinds(&result), vec![ErrorKind::UnverifiedJoin]);
        assert_eq!(
            result.findings()[0].subject.as_deref(),
            Some("employees.name = departments.name")
        );
        assert!(result.passed());
    }

    #[test]
    fn test_null_comparison_is_warning() {
        let result = verify("SELECT name FROM employees WHERE name = NULL OR dept_id <> NULL");
        assert_eq!(
            kinds(&result),
            vec![ErrorKind::NullComparison, ErrorKind::NullComparison]
        );
        assert!(result.passed());
        assert_eq!(result.findings()[0].severity, Severity::Warning);
        assert_eq!(result.findings()[0].offset, Some(38));
        assert_eq!(
            result.findings()[1].hint,
            Some(RepairHint::advice("use IS NOT NULL"))
        );

        assert!(verify("SELECT name FROM employees WHERE name IS NULL")
            .findings()
            .is_empty());
    }

    #[test]
    fn test_having_without_group_by() {
        let result = verify("SELECT COUNT(*) FROM employees HAVING COUNT(*) > 1");
        assert_eq!(kinds(&result), vec![ErrorKind::HavingWithoutGroupBy]);
        assert_eq!(result.findings()[0].offset, Some(31));
        assert!(result.passed());

        assert!(verify(
            "SELECT dept_id, COUNT(*) FROM employees GROUP BY dept_id HAVING COUNT(*) > 1"
        )
        .findings()
        .is_empty());
    }

    #[test]
    fn test_cartesian_product() {
        let result = verify("SELECT e.name FROM employees e, departments d WHERE e.salary > 1");
        assert_eq!(kinds(&result), vec![ErrorKind::CartesianProduct]);
        let finding = &result.findings()[0];
        assert_eq!(finding.severity, Severity::Warning);
        assert_eq!(finding.subject.as_deref(), Some("e, d"));
        assert!(result.passed());

        assert!(verify(
            "SELECT e.name FROM employees e, departments d WHERE e.dept_id = d.id"
        )
        .findings()
        .is_empty());
    }

    #[test]
    fn test_ctes_subqueries_and_aliases() {
        let result = verify(
            "WITH rich AS (SELECT id, salary FROM employees WHERE salary > 1) \
             SELECT r.id, r.salary * 2 AS doubled FROM rich r \
             WHERE EXISTS (SELECT 1 FROM departments d WHERE d.id = r.id) \
             ORDER BY doubled",
        );
        assert!(result.findings().is_empty(), "{:?}", result.findings());
    }

    #[test]
    fn test_correlated_reference_resolves_in_outer_block() {
        let result = verify(
            "SELECT name FROM departments d \
             WHERE EXISTS (SELECT 1 FROM employees e WHERE e.dept_id = d.id AND salary > 10)",
        );
        assert!(result.findings().is_empty(), "{:?}", result.findings());
    }

    #[test]
    fn test_nearest_match_tie_uses_declaration_order() {
        // "nam" is one edit from "name" in both tables; employees is declared first
        let result = verify("SELECT e.id FROM employees e JOIN departments d ON e.dept_id = d.id WHERE nam = 'x'");
        let finding = result
            .findings()
            .iter()
            .find(|f| f.kind == ErrorKind::UnknownColumn)
            .unwrap();
        assert!(finding.message.contains("employees, departments"));
        assert_eq!(
            finding.hint,
            Some(RepairHint::ReplaceIdentifier {
                offset: 74,
                original: "nam".to_string(),
                replacement: "name".to_string(),
                distance: 1
            })
        );
    }
}
