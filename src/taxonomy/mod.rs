//! Error Taxonomy
//!
//! Closed vocabulary of finding kinds shared by every verifier stage. Each
//! kind belongs to exactly one stage and carries a fixed default severity and
//! whether the repair engine knows an automatic fix for it.

pub mod finding;

pub use finding::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// CRITICAL and ERROR findings make a report fail
    pub fn is_failing(&self) -> bool {
        *self >= Severity::Error
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Grammar,
    Schema,
    Execution,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Grammar => "grammar",
            Stage::Schema => "schema",
            Stage::Execution => "execution",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Grammar
    EmptyStatement,
    MultipleStatements,
    UnbalancedDelimiter,
    ClauseOrderViolation,
    ReservedWordMisuse,
    EmptyClause,
    MissingJoinCondition,
    // Schema
    UnknownTable,
    UnknownColumn,
    AmbiguousColumn,
    MissingGroupBy,
    AggregateInWhere,
    TypeMismatch,
    UnverifiedJoin,
    NullComparison,
    CartesianProduct,
    HavingWithoutGroupBy,
    // Execution
    ExecutionTimeout,
    RuntimeError,
    EmptyResult,
    ExcessiveResult,
    SlowExecution,
    ExecutionStats,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 23] = [
        ErrorKind::EmptyStatement,
        ErrorKind::MultipleStatements,
        ErrorKind::UnbalancedDelimiter,
        ErrorKind::ClauseOrderViolation,
        ErrorKind::ReservedWordMisuse,
        ErrorKind::EmptyClause,
        ErrorKind::MissingJoinCondition,
        ErrorKind::UnknownTable,
        ErrorKind::UnknownColumn,
        ErrorKind::AmbiguousColumn,
        ErrorKind::MissingGroupBy,
        ErrorKind::AggregateInWhere,
        ErrorKind::TypeMismatch,
        ErrorKind::UnverifiedJoin,
        ErrorKind::NullComparison,
        ErrorKind::CartesianProduct,
        ErrorKind::HavingWithoutGroupBy,
        ErrorKind::ExecutionTimeout,
        ErrorKind::RuntimeError,
        ErrorKind::EmptyResult,
        ErrorKind::ExcessiveResult,
        ErrorKind::SlowExecution,
        ErrorKind::ExecutionStats,
    ];

    pub fn stage(&self) -> Stage {
        use ErrorKind::*;
        match self {
            EmptyStatement | MultipleStatements | UnbalancedDelimiter | ClauseOrderViolation
            | ReservedWordMisuse | EmptyClause | MissingJoinCondition => Stage::Grammar,
            UnknownTable | UnknownColumn | AmbiguousColumn | MissingGroupBy | AggregateInWhere
            | TypeMismatch | UnverifiedJoin | NullComparison | CartesianProduct
            | HavingWithoutGroupBy => Stage::Schema,
            ExecutionTimeout | RuntimeError | EmptyResult | ExcessiveResult | SlowExecution
            | ExecutionStats => Stage::Execution,
        }
    }

    pub fn default_severity(&self) -> Severity {
        use ErrorKind::*;
        match self {
            EmptyStatement | MultipleStatements | UnbalancedDelimiter | ClauseOrderViolation
            | UnknownTable | ExecutionTimeout | RuntimeError => Severity::Critical,
            UnknownColumn | AmbiguousColumn | MissingGroupBy | AggregateInWhere => Severity::Error,
            ReservedWordMisuse | EmptyClause | MissingJoinCondition | TypeMismatch
            | UnverifiedJoin | NullComparison | CartesianProduct | HavingWithoutGroupBy
            | EmptyResult | ExcessiveResult | SlowExecution => Severity::Warning,
            ExecutionStats => Severity::Info,
        }
    }

    /// Whether the repair engine has a transformation for this kind
    pub fn auto_fixable(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnbalancedDelimiter
                | ErrorKind::ClauseOrderViolation
                | ErrorKind::UnknownTable
                | ErrorKind::UnknownColumn
        )
    }

    pub fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            EmptyStatement => "EMPTY_STATEMENT",
            MultipleStatements => "MULTIPLE_STATEMENTS",
            UnbalancedDelimiter => "UNBALANCED_DELIMITER",
            ClauseOrderViolation => "CLAUSE_ORDER_VIOLATION",
            ReservedWordMisuse => "RESERVED_WORD_MISUSE",
            EmptyClause => "EMPTY_CLAUSE",
            MissingJoinCondition => "MISSING_JOIN_CONDITION",
            UnknownTable => "UNKNOWN_TABLE",
            UnknownColumn => "UNKNOWN_COLUMN",
            AmbiguousColumn => "AMBIGUOUS_COLUMN",
            MissingGroupBy => "MISSING_GROUP_BY",
            AggregateInWhere => "AGGREGATE_IN_WHERE",
            TypeMismatch => "TYPE_MISMATCH",
            UnverifiedJoin => "UNVERIFIED_JOIN",
            NullComparison => "NULL_COMPARISON",
            CartesianProduct => "CARTESIAN_PRODUCT",
            HavingWithoutGroupBy => "HAVING_WITHOUT_GROUP_BY",
            ExecutionTimeout => "EXECUTION_TIMEOUT",
            RuntimeError => "RUNTIME_ERROR",
            EmptyResult => "EMPTY_RESULT",
            ExcessiveResult => "EXCESSIVE_RESULT",
            SlowExecution => "SLOW_EXECUTION",
            ExecutionStats => "EXECUTION_STATS",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Error.is_failing());
        assert!(!Severity::Warning.is_failing());
    }

    #[test]
    fn test_fixable_kinds_are_failing() {
        for kind in ErrorKind::ALL {
            if kind.auto_fixable() {
                assert!(kind.default_severity().is_failing(), "{}", kind);
            }
        }
    }

    #[test]
    fn test_stage_grouping() {
        assert_eq!(ErrorKind::UnbalancedDelimiter.stage(), Stage::Grammar);
        assert_eq!(ErrorKind::UnverifiedJoin.stage(), Stage::Schema);
        assert_eq!(ErrorKind::MultipleStatements.stage(), Stage::Grammar);
        assert_eq!(ErrorKind::MultipleStatements.default_severity(), Severity::Critical);
        assert_eq!(ErrorKind::NullComparison.default_severity(), Severity::Warning);
        assert!(!ErrorKind::CartesianProduct.auto_fixable());
        assert_eq!(ErrorKind::ExecutionTimeout.stage(), Stage::Execution);
        assert_eq!(ErrorKind::MissingGroupBy.default_severity(), Severity::Error);
        assert!(!ErrorKind::MissingGroupBy.auto_fixable());
    }

    #[test]
    fn test_serde_names_match_display() {
        for kind in ErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"CRITICAL\"");
    }
}
