//! Execution backend seam
//!
//! A backend materializes the sample data into a private, ephemeral context,
//! runs one statement under a wall-clock budget and tears the context down.

use crate::error::Result;
use crate::schema::{SampleDataset, SchemaModel};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One execution request; every field is borrowed for the duration of the call
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub sql: &'a str,
    pub schema: &'a SchemaModel,
    /// Without a dataset every table is created empty
    pub dataset: Option<&'a SampleDataset>,
    pub budget: Duration,
    /// Plan the statement instead of running it
    pub dry_run: bool,
    /// Number of result rows to keep
    pub sample_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub row_count: usize,
    pub sample_rows: Vec<Vec<String>>,
    pub latency: Duration,
}

/// Statement-level outcome. Infrastructure failures are `Err`, never an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Completed(QueryOutput),
    TimedOut { elapsed: Duration },
    Failed { message: String },
}

pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome>;
}
