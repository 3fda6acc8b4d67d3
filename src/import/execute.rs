use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use sqlx::sqlite::SqliteArguments;
use sqlx::query::Query;
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool};
use tracing::{info, warn};

use super::{ImportMode, ImportRequest};
use crate::db::catalog::{self, ColumnDescriptor, SchemaRegistry};
use crate::db::ForeignKeyGuard;
use crate::literal::{ident_list, quote_ident};
use crate::report::{MutationReport, Phase};
use crate::table_order;
use crate::value::TypeHint;
use crate::{AppError, AppResult};

const OPERATION: &str = "import";

/// Insert statement builder for one table, limited to the columns the live
/// schema reports. Keys in a row that are not columns are ignored.
pub struct TableInserter {
    table: String,
    columns: Vec<ColumnDescriptor>,
    hints: Vec<TypeHint>,
}

impl TableInserter {
    pub async fn load(conn: &mut SqliteConnection, table: &str) -> AppResult<Self> {
        let columns = catalog::columns(conn, table).await?;
        let hints = columns
            .iter()
            .map(|c| TypeHint::from_declared(&c.declared_type))
            .collect();
        Ok(Self {
            table: table.to_string(),
            columns,
            hints,
        })
    }

    pub async fn insert(&self, conn: &mut SqliteConnection, row: &Value) -> AppResult<()> {
        let object = row.as_object().ok_or_else(|| {
            AppError::validation("ROW_SHAPE", "Each row must be a JSON object")
                .with_context("table", self.table.clone())
        })?;
        let present: Vec<(&ColumnDescriptor, TypeHint, &Value)> = self
            .columns
            .iter()
            .zip(&self.hints)
            .filter_map(|(column, hint)| object.get(&column.name).map(|v| (column, *hint, v)))
            .collect();
        if present.is_empty() {
            return Err(AppError::validation(
                "ROW_COLUMNS",
                format!("Row has no columns of table {}", self.table),
            )
            .with_context("table", self.table.clone()));
        }

        let placeholders: Vec<String> = (1..=present.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table),
            ident_list(present.iter().map(|(c, _, _)| c.name.as_str())),
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for (_, hint, value) in &present {
            query = bind_value(query, value, *hint);
        }
        query.execute(&mut *conn).await.map_err(|err| {
            AppError::from(err).with_context("table", self.table.clone())
        })?;
        Ok(())
    }
}

fn bind_value<'q>(
    q: Query<'q, Sqlite, SqliteArguments<'q>>,
    v: &Value,
    hint: TypeHint,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) if hint == TypeHint::Blob => match STANDARD.decode(s) {
            Ok(bytes) => q.bind(bytes),
            Err(_) => q.bind(s.clone()),
        },
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

async fn delete_all(conn: &mut SqliteConnection, table: &str) -> AppResult<u64> {
    let sql = format!("DELETE FROM {}", quote_ident(table));
    let done = sqlx::query(&sql)
        .execute(&mut *conn)
        .await
        .map_err(|err| AppError::from(err).with_context("table", table))?;
    Ok(done.rows_affected())
}

/// Imports one table, recording its outcome. Rows inserted before a failing
/// row stay in place.
async fn import_table(
    conn: &mut SqliteConnection,
    table: &str,
    rows: &Value,
    overwrite: bool,
    report: &mut MutationReport,
) {
    let Some(rows) = rows.as_array() else {
        let err = AppError::validation("ROWS", "Expected an array of rows")
            .with_context("table", table);
        report.failed(OPERATION, table, Phase::Inserting, &err, None);
        return;
    };
    let inserter = match TableInserter::load(conn, table).await {
        Ok(inserter) => inserter,
        Err(err) => {
            report.failed(OPERATION, table, Phase::Fetching, &err, None);
            return;
        }
    };
    if overwrite {
        if let Err(err) = delete_all(conn, table).await {
            report.failed(OPERATION, table, Phase::Deleting, &err, None);
            return;
        }
    }

    let mut inserted = 0u64;
    for (idx, row) in rows.iter().enumerate() {
        if let Err(err) = inserter.insert(conn, row).await {
            let err = err.with_context("row", idx.to_string());
            report.failed(OPERATION, table, Phase::Inserting, &err, Some(inserted));
            return;
        }
        inserted += 1;
    }
    report.succeeded(OPERATION, table, inserted);
}

fn rolled_back(report: &MutationReport) -> AppError {
    let mut err = AppError::transaction("ROLLED_BACK", "Import rolled back; no table was changed");
    if let Some(failure) = report.first_failure() {
        err = err
            .with_context("table", failure.table.clone())
            .with_cause(AppError::new(failure.code.clone(), failure.error.clone()));
    }
    err
}

async fn apply(
    conn: &mut SqliteConnection,
    planned: &[(&str, &Value)],
    overwrite: bool,
    mode: ImportMode,
    mut report: MutationReport,
) -> AppResult<MutationReport> {
    let mut tx = conn.begin().await.map_err(|err| {
        AppError::from(err).with_context("operation", OPERATION)
    })?;
    for (table, rows) in planned {
        let failures_before = report.failed_tables.len();
        import_table(&mut tx, table, rows, overwrite, &mut report).await;
        if mode == ImportMode::AllOrNothing && report.failed_tables.len() > failures_before {
            tx.rollback().await.map_err(|err| {
                AppError::transaction("ROLLBACK", "Failed to roll back import").with_cause(err)
            })?;
            warn!(target: "faena", event = "import_rolled_back", table = *table);
            return Err(rolled_back(&report));
        }
    }
    tx.commit().await.map_err(|err| {
        AppError::transaction("COMMIT", "Failed to commit import").with_cause(err)
    })?;
    Ok(report)
}

/// Writes each payload table inside one transaction with foreign-key checks
/// off. Tables go parents-first; names the schema does not know are reported
/// and skipped.
pub async fn import(
    pool: &SqlitePool,
    registry: &SchemaRegistry,
    request: &ImportRequest,
    default_mode: ImportMode,
) -> AppResult<MutationReport> {
    let mode = request.mode.unwrap_or(default_mode);
    let order = table_order::declared()?;
    let mut report = MutationReport::new();

    let mut by_table: BTreeMap<&str, Vec<(&str, &Value)>> = BTreeMap::new();
    for (name, rows) in &request.data {
        let Some(table) = registry.resolve(name) else {
            let err = AppError::not_found("TABLE", format!("Unknown table: {name}"))
                .with_context("table", name.clone());
            report.failed(OPERATION, name, Phase::Fetching, &err, None);
            continue;
        };
        by_table.entry(table).or_default().push((name.as_str(), rows));
    }

    // Keys that differ only in case name the same table; none of them is applied.
    let mut planned: Vec<(&str, &Value)> = Vec::with_capacity(by_table.len());
    for (table, given) in by_table {
        if let [(_, rows)] = given.as_slice() {
            planned.push((table, *rows));
            continue;
        }
        let names: Vec<&str> = given.iter().map(|(name, _)| *name).collect();
        let err = AppError::validation(
            "DUPLICATE_TABLE",
            format!("Table {table} given more than once: {}", names.join(", ")),
        )
        .with_context("table", table);
        report.failed(OPERATION, table, Phase::Fetching, &err, None);
    }
    if mode == ImportMode::AllOrNothing && report.has_failures() {
        return Err(rolled_back(&report));
    }
    planned.sort_by(|a, b| order.table_order_key(a.0).cmp(&order.table_order_key(b.0)));

    let mut guard = ForeignKeyGuard::acquire(pool, OPERATION).await?;
    let outcome = apply(guard.connection(), &planned, request.overwrite, mode, report).await;
    guard.release().await;

    if let Ok(report) = &outcome {
        info!(
            target: "faena",
            event = "import_complete",
            mode = ?mode,
            overwrite = request.overwrite,
            rows = report.total(),
            succeeded = report.succeeded_tables.len(),
            failed = report.failed_tables.len()
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn inserter_binds_by_declared_type() {
        let mut conn = SqliteConnection::connect("sqlite::memory:")
            .await
            .expect("connect");
        sqlx::query(
            "CREATE TABLE herramientas (id_herramienta INTEGER PRIMARY KEY, nombre TEXT, disponible BOOLEAN, foto BLOB, specs JSON)",
        )
        .execute(&mut conn)
        .await
        .expect("ddl");

        let inserter = TableInserter::load(&mut conn, "herramientas").await.expect("load");
        inserter
            .insert(
                &mut conn,
                &json!({
                    "id_herramienta": 1,
                    "nombre": "Taladro",
                    "disponible": true,
                    "foto": "AQI=",
                    "specs": {"v": 18},
                    "herramienta_nombre": "ignored alias"
                }),
            )
            .await
            .expect("insert");

        let (disponible, foto, specs): (i64, Vec<u8>, String) =
            sqlx::query_as("SELECT disponible, foto, specs FROM herramientas")
                .fetch_one(&mut conn)
                .await
                .expect("read back");
        assert_eq!(disponible, 1);
        assert_eq!(foto, vec![1, 2]);
        assert_eq!(specs, r#"{"v":18}"#);

        let err = inserter
            .insert(&mut conn, &json!({"otra": 1}))
            .await
            .expect_err("no known columns");
        assert_eq!(err.code(), "VALIDATION/ROW_COLUMNS");
        let err = inserter
            .insert(&mut conn, &json!([1, 2]))
            .await
            .expect_err("not an object");
        assert_eq!(err.code(), "VALIDATION/ROW_SHAPE");
    }
}
