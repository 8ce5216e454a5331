//! Error Classifier
//!
//! Maps backend error messages onto runtime error classes.

use crate::taxonomy::Severity;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref OBJECT_NAME: Regex =
        Regex::new(r#"(?i)(?:no such table|no such column|ambiguous column name):\s*([\w."]+)"#)
            .expect("valid object name pattern");
    static ref NEAR_TOKEN: Regex =
        Regex::new(r#"(?i)near "([^"]*)": syntax error"#).expect("valid syntax error pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeErrorClass {
    NoSuchTable,
    NoSuchColumn,
    AmbiguousColumn,
    Syntax,
    TypeMismatch,
    DivisionByZero,
    ConstraintViolation,
    AggregateMisuse,
    /// Writes, ATTACH or a second statement, refused by the execution context
    NotPermitted,
    Other,
}

impl fmt::Display for RuntimeErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RuntimeErrorClass::NoSuchTable => "no such table",
            RuntimeErrorClass::NoSuchColumn => "no such column",
            RuntimeErrorClass::AmbiguousColumn => "ambiguous column",
            RuntimeErrorClass::Syntax => "syntax error",
            RuntimeErrorClass::TypeMismatch => "type mismatch",
            RuntimeErrorClass::DivisionByZero => "division by zero",
            RuntimeErrorClass::ConstraintViolation => "constraint violation",
            RuntimeErrorClass::AggregateMisuse => "aggregate misuse",
            RuntimeErrorClass::NotPermitted => "not permitted",
            RuntimeErrorClass::Other => "execution error",
        };
        write!(f, "{}", label)
    }
}

impl RuntimeErrorClass {
    /// Missing objects, syntax and unknown failures block the statement outright;
    /// the data-dependent classes are errors
    pub fn severity(&self) -> Severity {
        match self {
            RuntimeErrorClass::NoSuchTable
            | RuntimeErrorClass::NoSuchColumn
            | RuntimeErrorClass::Syntax
            | RuntimeErrorClass::NotPermitted
            | RuntimeErrorClass::Other => Severity::Critical,
            RuntimeErrorClass::AmbiguousColumn
            | RuntimeErrorClass::TypeMismatch
            | RuntimeErrorClass::DivisionByZero
            | RuntimeErrorClass::ConstraintViolation
            | RuntimeErrorClass::AggregateMisuse => Severity::Error,
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            RuntimeErrorClass::NoSuchTable => "Verify table name exists in schema",
            RuntimeErrorClass::NoSuchColumn => "Verify column name exists in the referenced table",
            RuntimeErrorClass::AmbiguousColumn => "Qualify the column with its table or alias",
            RuntimeErrorClass::Syntax => "Check the statement near the reported token",
            RuntimeErrorClass::TypeMismatch => "Cast one side of the comparison to a common type",
            RuntimeErrorClass::DivisionByZero => "Guard the divisor with NULLIF(divisor, 0)",
            RuntimeErrorClass::ConstraintViolation => "Check the values against the column constraints",
            RuntimeErrorClass::AggregateMisuse => "Move aggregate conditions to HAVING or a subquery",
            RuntimeErrorClass::NotPermitted => "Only a single read-only query can be verified",
            RuntimeErrorClass::Other => "Inspect the backend error message",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, message: &str) -> RuntimeErrorClass {
        let msg = message.to_lowercase();

        if msg.contains("not authorized") || msg.contains("too many attached databases") {
            return RuntimeErrorClass::NotPermitted;
        }

        if msg.contains("no such table")
            || (msg.contains("table") && (msg.contains("not found") || msg.contains("does not exist")))
        {
            return RuntimeErrorClass::NoSuchTable;
        }

        if msg.contains("no such column")
            || (msg.contains("column") && (msg.contains("not found") || msg.contains("does not exist")))
        {
            return RuntimeErrorClass::NoSuchColumn;
        }

        if msg.contains("ambiguous") {
            return RuntimeErrorClass::AmbiguousColumn;
        }

        if msg.contains("misuse of aggregate") || msg.contains("aggregate functions are not allowed") {
            return RuntimeErrorClass::AggregateMisuse;
        }

        if msg.contains("division by zero") || msg.contains("divide by zero") {
            return RuntimeErrorClass::DivisionByZero;
        }

        if msg.contains("constraint failed") || msg.contains("constraint violation") {
            return RuntimeErrorClass::ConstraintViolation;
        }

        if msg.contains("datatype mismatch") || msg.contains("type mismatch") {
            return RuntimeErrorClass::TypeMismatch;
        }

        if msg.contains("syntax error") || msg.contains("incomplete input") || msg.contains("unrecognized token") {
            return RuntimeErrorClass::Syntax;
        }

        RuntimeErrorClass::Other
    }

    /// Object or token named in the message, if any
    pub fn subject(&self, message: &str) -> Option<String> {
        OBJECT_NAME
            .captures(message)
            .or_else(|| NEAR_TOKEN.captures(message))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_objects() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify("no such table: emplyees"),
            RuntimeErrorClass::NoSuchTable
        );
        assert_eq!(
            classifier.classify("no such column: nme"),
            RuntimeErrorClass::NoSuchColumn
        );
        assert_eq!(classifier.subject("no such column: e.nme"), Some("e.nme".to_string()));
    }

    #[test]
    fn test_classify_data_dependent_errors() {
        let classifier = ErrorClassifier::new();
        let class = classifier.classify("NOT NULL constraint failed: employees.id");
        assert_eq!(class, RuntimeErrorClass::ConstraintViolation);
        assert_eq!(class.severity(), Severity::Error);
        assert_eq!(
            classifier.classify("misuse of aggregate: COUNT()"),
            RuntimeErrorClass::AggregateMisuse
        );
        assert_eq!(
            classifier.classify("integer divide by zero"),
            RuntimeErrorClass::DivisionByZero
        );
    }

    #[test]
    fn test_classify_syntax_and_fallback() {
        let classifier = ErrorClassifier::new();
        let msg = "near \"FROM\": syntax error";
        assert_eq!(classifier.classify(msg), RuntimeErrorClass::Syntax);
        assert_eq!(classifier.subject(msg), Some("FROM".to_string()));
        let refused = classifier.classify("too many attached databases - max 0");
        assert_eq!(refused, RuntimeErrorClass::NotPermitted);
        assert_eq!(refused.severity(), Severity::Critical);
        assert_eq!(
            classifier.classify("not authorized: only read-only statements can be executed"),
            RuntimeErrorClass::NotPermitted
        );
        let other = classifier.classify("disk I/O error");
        assert_eq!(other, RuntimeErrorClass::Other);
        assert_eq!(other.severity(), Severity::Critical);
    }
}
