pub mod config;
pub mod error;
pub mod execution;
pub mod grammar;
pub mod matcher;
pub mod orchestrator;
pub mod repair;
pub mod schema;
pub mod semantic;
pub mod stage;
pub mod statement;
pub mod taxonomy;

pub use config::VerifierConfig;
pub use error::{Result, VerifierError};
pub use execution::{ExecutionBackend, ExecutionOutcome, ExecutionRequest, ExecutionVerifier, SqliteBackend};
pub use grammar::GrammarVerifier;
pub use orchestrator::{Orchestrator, RepairAttempt, SessionState, VerificationReport};
pub use repair::{RepairEngine, Transformation};
pub use schema::{ColumnDef, ForeignKey, SampleDataset, ScalarValue, SchemaModel, TableDef};
pub use semantic::SchemaVerifier;
pub use stage::{StageArtifacts, StageResult};
pub use statement::SqlStatement;
pub use taxonomy::{ErrorKind, Finding, RepairHint, Severity, Stage};
