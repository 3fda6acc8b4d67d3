use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod execute;

pub use execute::{import, TableInserter};

/// What happens to tables that imported cleanly when another table fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Commit everything that succeeded; failures are listed in the report.
    #[default]
    BestEffort,
    /// Roll back the whole import on the first failed table.
    AllOrNothing,
}

impl std::str::FromStr for ImportMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(ImportMode::BestEffort),
            "all_or_nothing" => Ok(ImportMode::AllOrNothing),
            other => Err(format!("unknown import mode: {other}")),
        }
    }
}

/// `{data: {table: [row, ...]}, overwrite?, mode?}`. A JSON export envelope
/// is accepted as-is: its `tablas` field is read as `data` and `metadata`
/// is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    #[serde(alias = "tablas")]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub mode: Option<ImportMode>,
}
