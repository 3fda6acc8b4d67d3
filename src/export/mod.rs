//! Export and backup: reads tables into an [`ExportManifest`] and renders it
//! in the requested format.

use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

use crate::db::catalog::{self, ObjectKind, SchemaRegistry};
use crate::db::fetch::{self, Scope};
use crate::literal::quote_ident;
use crate::table_order::{self, ScopeKind, SCOPE_COLUMN, SCOPE_ROOT};
use crate::{AppError, AppResult};

pub mod csv;
pub mod json;
pub mod labels;
pub mod manifest;
pub mod sheet;
pub mod sql;

pub use manifest::{ExportFile, ExportFormat, ExportManifest, ObjectSection, TableSection};

const FILE_STAMP: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub format: ExportFormat,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub full_backup: bool,
    #[serde(default)]
    pub include_structure: bool,
    #[serde(default)]
    pub include_views: bool,
    #[serde(default)]
    pub with_labels: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
    pub format: ExportFormat,
    #[serde(default)]
    pub with_labels: bool,
}

/// Resolves the request's table list, rejecting empty or unknown selections
/// before anything is read.
fn select_tables(registry: &SchemaRegistry, request: &ExportRequest) -> AppResult<Vec<String>> {
    if request.full_backup {
        if request.format == ExportFormat::Csv {
            return Err(AppError::validation(
                "FORMAT",
                "A full backup cannot be written as CSV",
            ));
        }
        return Ok(registry.tables().into_iter().map(str::to_string).collect());
    }
    if request.tables.is_empty() {
        return Err(AppError::validation(
            "EMPTY_SELECTION",
            "Select at least one table to export",
        )
        .with_context("field", "tables"));
    }

    let mut selected: Vec<String> = Vec::with_capacity(request.tables.len());
    for name in &request.tables {
        let table = registry.resolve(name).ok_or_else(|| {
            AppError::not_found("TABLE", format!("Unknown table: {name}")).with_context("table", name)
        })?;
        if !selected.iter().any(|t| t == table) {
            selected.push(table.to_string());
        }
    }
    if request.format == ExportFormat::Csv && selected.len() != 1 {
        return Err(AppError::validation(
            "CSV_SINGLE_TABLE",
            "CSV export takes exactly one table",
        )
        .with_context("tables", selected.len().to_string()));
    }
    Ok(selected)
}

async fn read_objects(conn: &mut SqliteConnection) -> Vec<ObjectSection> {
    let mut sections = Vec::with_capacity(3);
    for kind in [ObjectKind::View, ObjectKind::Trigger, ObjectKind::Routine] {
        sections.push(ObjectSection {
            kind,
            definitions: catalog::definitions(conn, kind).await,
        });
    }
    sections
}

async fn sequenced(conn: &mut SqliteConnection, table: &str) -> bool {
    catalog::uses_autoincrement(conn, table)
        .await
        .unwrap_or_else(|err| {
            warn!(
                target: "faena",
                event = "sequence_lookup_failed",
                table,
                error = %err
            );
            false
        })
}

/// Swaps each table's rows for label-enriched copies.
async fn apply_labels(conn: &mut SqliteConnection, manifest: &mut ExportManifest) {
    for section in &mut manifest.tables {
        section.data = labels::enrich_outcome(conn, &section.data).await;
    }
}

fn render(manifest: &ExportManifest, format: ExportFormat, file_stem: String) -> AppResult<ExportFile> {
    let body = match format {
        ExportFormat::Json => json::render(manifest)?,
        ExportFormat::Sql => sql::render(manifest).into_bytes(),
        ExportFormat::Excel => sheet::render(manifest)?,
        ExportFormat::Csv => {
            let section = manifest.tables.first().ok_or_else(|| {
                AppError::validation("CSV_SINGLE_TABLE", "CSV export takes exactly one table")
            })?;
            csv::render(&section.data)?
        }
    };
    let file_name = format!(
        "{file_stem}_{}.{}",
        manifest.generated_at.format(FILE_STAMP),
        format.extension()
    );
    let file = ExportFile::new(file_name, format, body);
    info!(
        target: "faena",
        event = "export_rendered",
        file = %file.file_name,
        bytes = file.body.len(),
        sha256 = %file.sha256,
        tables = manifest.tables.len(),
        failed_tables = manifest.failed_tables()
    );
    Ok(file)
}

/// Export by table list, or a full backup of every table with structure,
/// views, triggers and routines.
pub async fn export_tables(
    pool: &SqlitePool,
    registry: &SchemaRegistry,
    request: &ExportRequest,
) -> AppResult<ExportFile> {
    let mut tables = select_tables(registry, request)?;
    let order = table_order::declared()?;
    tables.sort_by(|a, b| order.table_order_key(a).cmp(&order.table_order_key(b)));

    let include_structure = request.full_backup || request.include_structure;
    let include_objects = request.full_backup || request.include_views;

    let mut tx = pool.begin().await.map_err(|err| {
        AppError::from(err).with_context("operation", "export_begin")
    })?;
    let mut manifest = ExportManifest::new(None);
    manifest.replace_data = request.full_backup;
    for table in &tables {
        let data = fetch::fetch_isolated(&mut tx, table, None).await;
        let ddl = if include_structure {
            Some(catalog::create_statement(&mut tx, ObjectKind::Table, table).await)
        } else {
            None
        };
        let resets_sequence = request.full_backup && sequenced(&mut tx, table).await;
        manifest.tables.push(TableSection {
            data,
            ddl,
            resets_sequence,
        });
    }
    if include_objects && request.format == ExportFormat::Sql {
        manifest.objects = read_objects(&mut tx).await;
    }
    if request.with_labels && request.format != ExportFormat::Sql {
        apply_labels(&mut tx, &mut manifest).await;
    }
    tx.commit().await.map_err(|err| {
        AppError::from(err).with_context("operation", "export_commit")
    })?;

    let stem = match (request.full_backup, request.format) {
        (true, _) => "respaldo_completo".to_string(),
        (false, ExportFormat::Csv) => tables.first().cloned().unwrap_or_default(),
        (false, _) => "exportacion".to_string(),
    };
    render(&manifest, request.format, stem)
}

pub async fn project_exists(conn: &mut SqliteConnection, project_id: i64) -> AppResult<bool> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?1",
        quote_ident(SCOPE_ROOT),
        quote_ident(SCOPE_COLUMN)
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(project_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "project_exists"))?;
    Ok(count > 0)
}

pub fn project_not_found(project_id: i64) -> AppError {
    AppError::not_found("PROJECT", format!("Project {project_id} does not exist"))
        .with_context("id_proyecto", project_id.to_string())
}

/// Data-only export of every scoped table for one project, parents first.
pub async fn backup_project(
    pool: &SqlitePool,
    project_id: i64,
    request: &BackupRequest,
) -> AppResult<ExportFile> {
    if request.format == ExportFormat::Csv {
        return Err(AppError::validation(
            "FORMAT",
            "Project backups are written as sql, excel or json",
        )
        .with_context("format", "csv"));
    }
    let order = table_order::declared()?;

    let mut tx = pool.begin().await.map_err(|err| {
        AppError::from(err).with_context("operation", "backup_begin")
    })?;
    if !project_exists(&mut tx, project_id).await? {
        return Err(project_not_found(project_id));
    }

    let mut manifest = ExportManifest::new(Some(project_id));
    for spec in order.reconstruction_order(ScopeKind::Project) {
        let scope = spec.scoping_column.map(|column| Scope {
            column,
            value: project_id,
        });
        let data = fetch::fetch_isolated(&mut tx, spec.name, scope).await;
        manifest.tables.push(TableSection {
            data,
            ddl: None,
            resets_sequence: false,
        });
    }
    if request.with_labels && request.format != ExportFormat::Sql {
        apply_labels(&mut tx, &mut manifest).await;
    }
    tx.commit().await.map_err(|err| {
        AppError::from(err).with_context("operation", "backup_commit")
    })?;

    render(
        &manifest,
        request.format,
        format!("respaldo_proyecto_{project_id}"),
    )
}
