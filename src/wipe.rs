//! Destructive deletes: full truncation of chosen tables and scoped removal
//! of one project's rows. Both require the literal confirmation token and run
//! in a single transaction with foreign-key checks off.

use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tracing::info;

use crate::db::catalog::SchemaRegistry;
use crate::db::ForeignKeyGuard;
use crate::export::{project_exists, project_not_found};
use crate::literal::quote_ident;
use crate::report::{MutationReport, Phase};
use crate::table_order::{self, ScopeKind};
use crate::{AppError, AppResult};

pub const CONFIRMATION_TOKEN: &str = "CONFIRMAR";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WipeRequest {
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub confirm: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WipeProjectRequest {
    #[serde(default)]
    pub confirm: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WipeOutcome {
    #[serde(flatten)]
    pub report: MutationReport,
    pub total_registros_eliminados: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_proyecto: Option<i64>,
}

impl WipeOutcome {
    fn new(report: MutationReport, id_proyecto: Option<i64>) -> Self {
        Self {
            total_registros_eliminados: report.total(),
            report,
            id_proyecto,
        }
    }
}

/// Exact, case-sensitive match against [`CONFIRMATION_TOKEN`].
pub fn check_confirmation(token: Option<&str>) -> AppResult<()> {
    match token {
        Some(CONFIRMATION_TOKEN) => Ok(()),
        Some(_) => Err(AppError::validation(
            "CONFIRMATION",
            format!("Confirmation token does not match; send \"{CONFIRMATION_TOKEN}\""),
        )
        .with_context("field", "confirm")),
        None => Err(AppError::validation(
            "CONFIRMATION",
            format!("Missing confirmation token \"{CONFIRMATION_TOKEN}\""),
        )
        .with_context("field", "confirm")),
    }
}

/// Removes every row and resets the table's autoincrement counter. Any
/// failure carries the table name.
async fn truncate(conn: &mut SqliteConnection, table: &str) -> AppResult<u64> {
    clear_table(conn, table)
        .await
        .map_err(|err| AppError::from(err).with_context("table", table))
}

async fn clear_table(conn: &mut SqliteConnection, table: &str) -> Result<u64, sqlx::Error> {
    let sql = format!("DELETE FROM {}", quote_ident(table));
    let deleted = sqlx::query(&sql).execute(&mut *conn).await?.rows_affected();

    let has_sequence: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
    )
    .fetch_one(&mut *conn)
    .await?;
    if has_sequence > 0 {
        sqlx::query("DELETE FROM sqlite_sequence WHERE name = ?1")
            .bind(table)
            .execute(&mut *conn)
            .await?;
    }
    Ok(deleted)
}

async fn delete_scoped(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    project_id: i64,
) -> AppResult<u64> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(table),
        quote_ident(column)
    );
    let done = sqlx::query(&sql)
        .bind(project_id)
        .execute(&mut *conn)
        .await
        .map_err(|err| AppError::from(err).with_context("table", table))?;
    Ok(done.rows_affected())
}

fn commit_failed(err: sqlx::Error, operation: &str) -> AppError {
    AppError::transaction("COMMIT", format!("Failed to commit {operation}")).with_cause(err)
}

async fn truncate_all(conn: &mut SqliteConnection, tables: &[String]) -> AppResult<MutationReport> {
    let mut report = MutationReport::new();
    let mut tx = conn.begin().await?;
    for table in tables {
        match truncate(&mut tx, table).await {
            Ok(count) => report.succeeded("wipe", table, count),
            Err(err) => report.failed("wipe", table, Phase::Deleting, &err, None),
        }
    }
    if let Err(err) = tx.commit().await {
        return Err(commit_failed(err, "wipe"));
    }
    Ok(report)
}

/// Truncates the listed tables, referencing tables first.
pub async fn wipe(
    pool: &SqlitePool,
    registry: &SchemaRegistry,
    request: &WipeRequest,
) -> AppResult<WipeOutcome> {
    check_confirmation(request.confirm.as_deref())?;
    if request.tables.is_empty() {
        return Err(AppError::validation(
            "EMPTY_SELECTION",
            "Select at least one table to wipe",
        )
        .with_context("field", "tables"));
    }
    let mut tables: Vec<String> = Vec::with_capacity(request.tables.len());
    for name in &request.tables {
        let table = registry.resolve(name).ok_or_else(|| {
            AppError::not_found("TABLE", format!("Unknown table: {name}")).with_context("table", name)
        })?;
        if !tables.iter().any(|t| t == table) {
            tables.push(table.to_string());
        }
    }
    let order = table_order::declared()?;
    tables.sort_by(|a, b| order.deletion_key(a).cmp(&order.deletion_key(b)));

    let mut guard = ForeignKeyGuard::acquire(pool, "wipe").await?;
    let outcome = truncate_all(guard.connection(), &tables).await;
    guard.release().await;

    let outcome = WipeOutcome::new(outcome?, None);
    info!(
        target: "faena",
        event = "wipe_complete",
        tables = tables.len(),
        deleted = outcome.total_registros_eliminados,
        failed = outcome.report.failed_tables.len()
    );
    Ok(outcome)
}

async fn delete_project(conn: &mut SqliteConnection, project_id: i64) -> AppResult<MutationReport> {
    let order = table_order::declared()?;
    let mut tx = conn.begin().await?;
    if !project_exists(&mut tx, project_id).await? {
        return Err(project_not_found(project_id));
    }
    order.verify_against_schema(&mut tx).await?;

    let mut report = MutationReport::new();
    for spec in order.tables_for_scope(ScopeKind::Project) {
        let Some(column) = spec.scoping_column else {
            continue;
        };
        match delete_scoped(&mut tx, spec.name, column, project_id).await {
            Ok(count) => report.succeeded("wipe_project", spec.name, count),
            Err(err) => report.failed("wipe_project", spec.name, Phase::Deleting, &err, None),
        }
    }
    if let Err(err) = tx.commit().await {
        return Err(commit_failed(err, "wipe_project"));
    }
    Ok(report)
}

/// Deletes one project's rows from every scoped table, children first, the
/// project row last.
pub async fn wipe_project(
    pool: &SqlitePool,
    project_id: i64,
    request: &WipeProjectRequest,
) -> AppResult<WipeOutcome> {
    check_confirmation(request.confirm.as_deref())?;

    let mut guard = ForeignKeyGuard::acquire(pool, "wipe_project").await?;
    let outcome = delete_project(guard.connection(), project_id).await;
    guard.release().await;

    let outcome = WipeOutcome::new(outcome?, Some(project_id));
    info!(
        target: "faena",
        event = "wipe_project_complete",
        id_proyecto = project_id,
        deleted = outcome.total_registros_eliminados,
        failed = outcome.report.failed_tables.len()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn truncate_resets_counter_and_names_the_table_on_failure() {
        let mut conn = SqliteConnection::connect("sqlite::memory:")
            .await
            .expect("connect");
        sqlx::raw_sql(
            "CREATE TABLE nominas (id_nomina INTEGER PRIMARY KEY AUTOINCREMENT, periodo TEXT);
             INSERT INTO nominas (id_nomina, periodo) VALUES (40, '2024-01');",
        )
        .execute(&mut conn)
        .await
        .expect("seed");

        assert_eq!(truncate(&mut conn, "nominas").await.expect("truncate"), 1);
        let counters: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_sequence WHERE name = 'nominas'")
                .fetch_one(&mut conn)
                .await
                .expect("sequence");
        assert_eq!(counters, 0);

        let err = truncate(&mut conn, "no_existe").await.expect_err("missing table");
        assert_eq!(err.context().get("table").map(String::as_str), Some("no_existe"));
    }

    #[test]
    fn confirmation_must_match_exactly() {
        assert!(check_confirmation(Some("CONFIRMAR")).is_ok());
        for wrong in [Some("confirmar"), Some("CONFIRMAR "), Some(""), None] {
            let err = check_confirmation(wrong).expect_err("rejected");
            assert_eq!(err.code(), "VALIDATION/CONFIRMATION");
        }
    }

    #[test]
    fn outcome_flattens_report_and_totals() {
        let mut report = MutationReport::new();
        report.succeeded("wipe_project", "pagos_nomina", 3);
        report.succeeded("wipe_project", "proyectos", 1);
        let value = serde_json::to_value(WipeOutcome::new(report, Some(1))).expect("json");
        assert_eq!(value["total_registros_eliminados"], 4);
        assert_eq!(value["id_proyecto"], 1);
        assert_eq!(value["succeededTables"][0]["table"], "pagos_nomina");
    }
}
