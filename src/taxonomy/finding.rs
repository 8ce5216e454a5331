use super::{ErrorKind, Severity, Stage};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte range into a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Structured suggestion attached to a finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RepairHint {
    InsertDelimiter {
        delimiter: char,
        offset: usize,
    },
    ReplaceIdentifier {
        offset: usize,
        original: String,
        replacement: String,
        distance: usize,
    },
    /// Two adjacent clauses whose order must be exchanged; `first` precedes `second`
    SwapClauses {
        first: Span,
        second: Span,
    },
    Advice {
        text: String,
    },
}

impl RepairHint {
    pub fn advice(text: impl Into<String>) -> Self {
        RepairHint::Advice { text: text.into() }
    }
}

impl fmt::Display for RepairHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairHint::InsertDelimiter { delimiter, offset } => {
                write!(f, "insert '{}' at offset {}", delimiter, offset)
            }
            RepairHint::ReplaceIdentifier {
                original,
                replacement,
                distance,
                ..
            } => write!(
                f,
                "'{}' not found; nearest match '{}' (edit distance {})",
                original, replacement, distance
            ),
            RepairHint::SwapClauses { first, second } => write!(
                f,
                "move the clause at offset {} before the clause at offset {}",
                second.start, first.start
            ),
            RepairHint::Advice { text } => write!(f, "{}", text),
        }
    }
}

/// One diagnosed issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,

    /// Byte offset of the diagnosed element, when it has a location
    pub offset: Option<usize>,

    /// Offending text (table name, delimiter, keyword)
    pub subject: Option<String>,

    pub hint: Option<RepairHint>,

    /// Confidence of the hint, in [0, 1]
    pub confidence: Option<f64>,
}

impl Finding {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            stage: kind.stage(),
            message: message.into(),
            offset: None,
            subject: None,
            hint: None,
            confidence: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_hint(mut self, hint: RepairHint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn is_failing(&self) -> bool {
        self.severity.is_failing()
    }

    pub fn auto_fixable(&self) -> bool {
        self.kind.auto_fixable()
    }

    /// Identity used to guarantee a concern is never repaired twice per session
    pub fn repair_key(&self) -> (ErrorKind, Option<usize>) {
        (self.kind, self.offset)
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind, self.message)?;
        if let Some(offset) = self.offset {
            write!(f, " (offset {})", offset)?;
        }
        Ok(())
    }
}
