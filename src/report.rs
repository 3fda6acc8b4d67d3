use serde::Serialize;
use tracing::{info, warn};

use crate::AppError;

/// Where in the per-table lifecycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetching,
    Deleting,
    Inserting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub phase: Phase,
    pub error: String,
    pub code: String,
    /// Rows written before the failure; they are kept in best-effort mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<u64>,
}

/// Outcome of every table touched by an import or wipe. Each table appears
/// exactly once, in one of the two lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReport {
    pub succeeded_tables: Vec<TableCount>,
    pub failed_tables: Vec<TableFailure>,
}

impl MutationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(&mut self, operation: &str, table: &str, count: u64) {
        info!(target: "faena", event = "table_done", operation, table, count);
        self.succeeded_tables.push(TableCount {
            table: table.to_string(),
            count,
        });
    }

    pub fn failed(
        &mut self,
        operation: &str,
        table: &str,
        phase: Phase,
        error: &AppError,
        applied: Option<u64>,
    ) {
        warn!(
            target: "faena",
            event = "table_failed",
            operation,
            table,
            phase = ?phase,
            code = %error.code(),
            error = %error
        );
        self.failed_tables.push(TableFailure {
            table: table.to_string(),
            phase,
            error: error.message().to_string(),
            code: error.code().to_string(),
            applied,
        });
    }

    /// Rows counted across succeeded tables.
    pub fn total(&self) -> u64 {
        self.succeeded_tables.iter().map(|t| t.count).sum()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_tables.is_empty()
    }

    pub fn first_failure(&self) -> Option<&TableFailure> {
        self.failed_tables.first()
    }
}
