use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::catalog::ObjectKind;
use crate::db::fetch::TableOutcome;
use crate::value::TIMESTAMP_FORMAT;
use crate::AppResult;

pub const FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Excel,
    Sql,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "xlsx",
            ExportFormat::Sql => "sql",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Sql => "application/sql; charset=utf-8",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "sql" => Ok(ExportFormat::Sql),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

/// One table inside an export, with its DDL when structure was requested.
#[derive(Debug, Clone)]
pub struct TableSection {
    pub data: TableOutcome,
    /// `None` when structure was not requested.
    pub ddl: Option<AppResult<Option<String>>>,
    /// Clearing the table also clears its `sqlite_sequence` counter.
    pub resets_sequence: bool,
}

/// Captured definitions of one object kind; a failed listing keeps its error.
#[derive(Debug, Clone)]
pub struct ObjectSection {
    pub kind: ObjectKind,
    pub definitions: AppResult<Vec<(String, Option<String>)>>,
}

/// Everything one export call read, ready for any serializer.
#[derive(Debug, Clone)]
pub struct ExportManifest {
    pub scope_id: Option<i64>,
    pub generated_at: DateTime<Utc>,
    pub format_version: &'static str,
    /// Full-backup data sections clear each table before inserting.
    pub replace_data: bool,
    pub tables: Vec<TableSection>,
    pub objects: Vec<ObjectSection>,
}

impl ExportManifest {
    pub fn new(scope_id: Option<i64>) -> Self {
        Self {
            scope_id,
            generated_at: Utc::now(),
            format_version: FORMAT_VERSION,
            replace_data: false,
            tables: Vec::new(),
            objects: Vec::new(),
        }
    }

    pub fn generated_at_text(&self) -> String {
        self.generated_at.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.data.table.as_str()).collect()
    }

    pub fn failed_tables(&self) -> usize {
        self.tables.iter().filter(|t| t.data.rows.is_err()).count()
    }
}

/// A rendered export ready to be written to disk or sent as a response body.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub sha256: String,
}

impl ExportFile {
    pub fn new(file_name: String, format: ExportFormat, body: Vec<u8>) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(&body));
        Self {
            file_name,
            content_type: format.content_type(),
            body,
            sha256,
        }
    }
}
