//! Scoped and unscoped row reads that keep cell values typed.

use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqliteConnection, TypeInfo, ValueRef};
use tracing::{debug, warn};

use super::catalog::{self, ColumnDescriptor};
use crate::literal::{ident_list, quote_ident};
use crate::value::{parse_timestamp, Row, SqlValue, TypeHint};
use crate::{AppError, AppResult};

/// Equality filter on the tenant column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope<'a> {
    pub column: &'a str,
    pub value: i64,
}

/// One table's read, successful or not. A failed read keeps the error so the
/// serializers can render it in place of the rows.
#[derive(Debug, Clone)]
pub struct TableOutcome {
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: AppResult<Vec<Row>>,
}

impl TableOutcome {
    pub fn row_count(&self) -> usize {
        self.rows.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Reads the introspected columns of `table`, optionally filtered by `scope`.
/// Columns missing from `columns` are never selected.
pub async fn fetch(
    conn: &mut SqliteConnection,
    table: &str,
    columns: &[ColumnDescriptor],
    scope: Option<Scope<'_>>,
) -> AppResult<Vec<Row>> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let mut sql = format!(
        "SELECT {} FROM {}",
        ident_list(columns.iter().map(|c| c.name.as_str())),
        quote_ident(table)
    );
    if let Some(scope) = scope {
        if !columns.iter().any(|c| c.name == scope.column) {
            return Err(AppError::validation(
                "SCOPE_COLUMN",
                format!("Table {table} has no column {}", scope.column),
            )
            .with_context("table", table));
        }
        sql.push_str(&format!(" WHERE {} = ?1", quote_ident(scope.column)));
    }

    let hints: Vec<TypeHint> = columns
        .iter()
        .map(|c| TypeHint::from_declared(&c.declared_type))
        .collect();

    let mut query = sqlx::query(&sql);
    if let Some(scope) = scope {
        query = query.bind(scope.value);
    }
    let mut stream = query.fetch(&mut *conn);
    let mut rows = Vec::new();
    while let Some(raw) = stream.try_next().await.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "fetch")
            .with_context("table", table)
    })? {
        rows.push(decode_row(&raw, columns, &hints).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "decode")
                .with_context("table", table)
        })?);
    }
    Ok(rows)
}

/// Introspects and reads one table, turning any failure into an inline
/// outcome instead of an error.
pub async fn fetch_isolated(
    conn: &mut SqliteConnection,
    table: &str,
    scope: Option<Scope<'_>>,
) -> TableOutcome {
    let columns = match catalog::columns(conn, table).await {
        Ok(columns) => columns,
        Err(err) => return failed(table, Vec::new(), err),
    };
    match fetch(conn, table, &columns, scope).await {
        Ok(rows) => {
            debug!(
                target: "faena",
                event = "table_fetched",
                table,
                rows = rows.len(),
                scoped = scope.is_some()
            );
            TableOutcome {
                table: table.to_string(),
                columns,
                rows: Ok(rows),
            }
        }
        Err(err) => failed(table, columns, err),
    }
}

fn failed(table: &str, columns: Vec<ColumnDescriptor>, err: AppError) -> TableOutcome {
    warn!(
        target: "faena",
        event = "table_fetch_failed",
        table,
        code = %err.code(),
        error = %err
    );
    TableOutcome {
        table: table.to_string(),
        columns,
        rows: Err(err),
    }
}

fn decode_row(
    raw: &SqliteRow,
    columns: &[ColumnDescriptor],
    hints: &[TypeHint],
) -> Result<Row, sqlx::Error> {
    let mut row = Row::with_capacity(columns.len());
    for (idx, (column, hint)) in columns.iter().zip(hints).enumerate() {
        row.push(column.name.clone(), decode_cell(raw, idx, *hint)?);
    }
    Ok(row)
}

fn decode_cell(raw: &SqliteRow, idx: usize, hint: TypeHint) -> Result<SqlValue, sqlx::Error> {
    let value = raw.try_get_raw(idx)?;
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    let storage = value.type_info().name().to_string();

    let decoded = match (storage.as_str(), hint) {
        ("INTEGER", TypeHint::Bool) => SqlValue::Bool(raw.try_get::<i64, _>(idx)? != 0),
        ("INTEGER", _) => SqlValue::Integer(raw.try_get(idx)?),
        ("REAL", _) => SqlValue::Real(raw.try_get(idx)?),
        ("BLOB", _) => SqlValue::Blob(raw.try_get(idx)?),
        (_, TypeHint::Timestamp) => {
            let text: String = raw.try_get(idx)?;
            match parse_timestamp(&text) {
                Some(ts) => SqlValue::Timestamp(ts),
                None => SqlValue::Text(text),
            }
        }
        (_, TypeHint::Json) => {
            let text: String = raw.try_get(idx)?;
            match serde_json::from_str(&text) {
                Ok(json) => SqlValue::Json(json),
                Err(_) => SqlValue::Text(text),
            }
        }
        _ => SqlValue::Text(raw.try_get(idx)?),
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::Connection;

    async fn seeded() -> SqliteConnection {
        let mut conn = SqliteConnection::connect("sqlite::memory:")
            .await
            .expect("connect");
        sqlx::query(
            "CREATE TABLE herramientas (
                id_herramienta INTEGER PRIMARY KEY,
                id_proyecto INTEGER,
                nombre TEXT,
                disponible BOOLEAN,
                adquirida DATETIME,
                costo REAL,
                specs JSON,
                foto BLOB
            )",
        )
        .execute(&mut conn)
        .await
        .expect("ddl");
        sqlx::query(
            "INSERT INTO herramientas VALUES
                (1, 1, 'Taladro', 1, '2024-01-02 03:04:05', 120.5, '{\"v\":18}', X'0102'),
                (2, 1, 'Sierra', 0, NULL, NULL, 'not json', NULL),
                (3, 2, 'Nivel', 1, 'ayer', 9, NULL, NULL),
                (4, 2, 'Pulidora', 1, '2024-01-02T03:04:05.250', 15, NULL, NULL)",
        )
        .execute(&mut conn)
        .await
        .expect("seed");
        conn
    }

    #[tokio::test]
    async fn scoped_fetch_returns_exactly_matching_rows() {
        let mut conn = seeded().await;
        let columns = catalog::columns(&mut conn, "herramientas").await.expect("cols");
        let scope = Scope {
            column: "id_proyecto",
            value: 1,
        };
        let rows = fetch(&mut conn, "herramientas", &columns, Some(scope))
            .await
            .expect("fetch");
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|r| r.get("id_proyecto") == Some(&SqlValue::Integer(1))));

        let all = fetch(&mut conn, "herramientas", &columns, None).await.expect("all");
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn values_keep_their_types() {
        let mut conn = seeded().await;
        let outcome = fetch_isolated(&mut conn, "herramientas", None).await;
        let rows = outcome.rows.expect("rows");
        let first = &rows[0];
        assert_eq!(first.get("disponible"), Some(&SqlValue::Bool(true)));
        assert!(matches!(first.get("adquirida"), Some(SqlValue::Timestamp(_))));
        assert_eq!(first.get("costo"), Some(&SqlValue::Real(120.5)));
        assert_eq!(first.get("specs"), Some(&SqlValue::Json(json!({"v": 18}))));
        assert_eq!(first.get("foto"), Some(&SqlValue::Blob(vec![1, 2])));

        let second = &rows[1];
        assert_eq!(second.get("disponible"), Some(&SqlValue::Bool(false)));
        assert_eq!(second.get("adquirida"), Some(&SqlValue::Null));
        assert_eq!(second.get("specs"), Some(&SqlValue::Text("not json".into())));

        let third = &rows[2];
        assert_eq!(third.get("adquirida"), Some(&SqlValue::Text("ayer".into())));
        assert_eq!(third.get("costo"), Some(&SqlValue::Integer(9)));

        let fourth = &rows[3];
        assert_eq!(
            fourth.get("adquirida"),
            Some(&SqlValue::Text("2024-01-02T03:04:05.250".into()))
        );
    }

    #[tokio::test]
    async fn unknown_columns_are_not_selected() {
        let mut conn = seeded().await;
        let columns = vec![ColumnDescriptor::text("nombre")];
        let rows = fetch(&mut conn, "herramientas", &columns, None)
            .await
            .expect("fetch");
        assert!(rows.iter().all(|r| r.len() == 1));
    }

    #[tokio::test]
    async fn failed_read_is_captured_not_raised() {
        let mut conn = seeded().await;
        let outcome = fetch_isolated(&mut conn, "no_existe", None).await;
        assert_eq!(outcome.row_count(), 0);
        let err = outcome.rows.expect_err("missing table");
        assert_eq!(err.code(), "NOT_FOUND/TABLE");
    }

    #[tokio::test]
    async fn scope_on_missing_column_is_rejected() {
        let mut conn = seeded().await;
        let columns = vec![ColumnDescriptor::text("nombre")];
        let scope = Scope {
            column: "id_proyecto",
            value: 1,
        };
        let err = fetch(&mut conn, "herramientas", &columns, Some(scope))
            .await
            .expect_err("scope column missing");
        assert_eq!(err.code(), "VALIDATION/SCOPE_COLUMN");
    }
}
