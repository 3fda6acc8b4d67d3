//! Read-only catalog introspection: columns, base tables, views, triggers
//! and routines in the current schema.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::{Row, SqliteConnection};
use tracing::warn;

use crate::literal::quote_ident;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
}

impl ColumnDescriptor {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: "TEXT".to_string(),
            nullable: true,
            primary_key: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Table,
    View,
    Trigger,
    Routine,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Trigger => "trigger",
            ObjectKind::Routine => "routine",
        }
    }
}

/// One enumeration result. A failed enumeration carries an empty list and the
/// reason inline instead of failing the whole catalog read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Listing<T> {
    fn from_result(kind: ObjectKind, result: AppResult<Vec<T>>) -> Self {
        match result {
            Ok(items) => Self { items, error: None },
            Err(err) => {
                warn!(
                    target: "faena",
                    event = "catalog_listing_failed",
                    kind = kind.as_str(),
                    error = %err
                );
                Self {
                    items: Vec::new(),
                    error: Some(err.message().to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutineInfo {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaCatalog {
    pub tables: Listing<String>,
    pub views: Listing<String>,
    pub triggers: Listing<String>,
    pub routines: Listing<RoutineInfo>,
}

pub async fn columns(conn: &mut SqliteConnection, table: &str) -> AppResult<Vec<ColumnDescriptor>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "table_info")
            .with_context("table", table)
    })?;
    if rows.is_empty() {
        return Err(
            AppError::not_found("TABLE", format!("Unknown table or view: {table}"))
                .with_context("table", table),
        );
    }

    rows.iter()
        .map(|row| {
            Ok(ColumnDescriptor {
                name: row.try_get("name")?,
                declared_type: row.try_get::<Option<String>, _>("type")?.unwrap_or_default(),
                nullable: row.try_get::<i64, _>("notnull")? == 0,
                primary_key: row.try_get::<i64, _>("pk")? > 0,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(|err| AppError::from(err).with_context("table", table))
}

pub async fn object_names(conn: &mut SqliteConnection, kind: ObjectKind) -> AppResult<Vec<String>> {
    if kind == ObjectKind::Routine {
        return Ok(list_routines(conn).await?.into_iter().map(|r| r.name).collect());
    }
    sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master \
         WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .bind(kind.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| AppError::from(err).with_context("operation", format!("list_{}s", kind.as_str())))
}

/// SQLite has no stored procedures or functions, so the listing is always empty.
pub async fn list_routines(_conn: &mut SqliteConnection) -> AppResult<Vec<RoutineInfo>> {
    Ok(Vec::new())
}

pub async fn catalog(conn: &mut SqliteConnection) -> SchemaCatalog {
    let tables = object_names(conn, ObjectKind::Table).await;
    let views = object_names(conn, ObjectKind::View).await;
    let triggers = object_names(conn, ObjectKind::Trigger).await;
    let routines = list_routines(conn).await;
    SchemaCatalog {
        tables: Listing::from_result(ObjectKind::Table, tables),
        views: Listing::from_result(ObjectKind::View, views),
        triggers: Listing::from_result(ObjectKind::Trigger, triggers),
        routines: Listing::from_result(ObjectKind::Routine, routines),
    }
}

/// The database's own DDL text for one object, or `None` when it has none.
pub async fn create_statement(
    conn: &mut SqliteConnection,
    kind: ObjectKind,
    name: &str,
) -> AppResult<Option<String>> {
    let sql: Option<Option<String>> =
        sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = ?1 AND name = ?2")
            .bind(kind.as_str())
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "create_statement")
                    .with_context("object", name)
            })?;
    Ok(sql.flatten())
}

/// Name and captured DDL of every object of one kind, in name order.
pub async fn definitions(
    conn: &mut SqliteConnection,
    kind: ObjectKind,
) -> AppResult<Vec<(String, Option<String>)>> {
    if kind == ObjectKind::Routine {
        return Ok(list_routines(conn)
            .await?
            .into_iter()
            .map(|r| (r.name, None))
            .collect());
    }
    sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT name, sql FROM sqlite_master \
         WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .bind(kind.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| {
        AppError::from(err).with_context("operation", format!("{}_definitions", kind.as_str()))
    })
}

/// Whether the table was declared `AUTOINCREMENT`, i.e. keeps a counter in
/// `sqlite_sequence`.
pub async fn uses_autoincrement(conn: &mut SqliteConnection, table: &str) -> AppResult<bool> {
    let found: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master \
         WHERE type = 'table' AND name = ?1 AND sql LIKE '%AUTOINCREMENT%'",
    )
    .bind(table)
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| {
        AppError::from(err)
            .with_context("operation", "uses_autoincrement")
            .with_context("table", table)
    })?;
    Ok(found > 0)
}

pub async fn count_rows(conn: &mut SqliteConnection, table: &str) -> AppResult<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| AppError::from(err).with_context("table", table))
}

/// Base-table names resolved once at startup so request-supplied names are
/// matched by map lookup instead of re-reading the catalog per call.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, String>,
}

impl SchemaRegistry {
    pub async fn load(conn: &mut SqliteConnection) -> AppResult<Self> {
        let names = object_names(conn, ObjectKind::Table).await?;
        Ok(Self::from_names(names))
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tables = names
            .into_iter()
            .map(Into::into)
            .map(|name: String| (name.to_ascii_lowercase(), name))
            .collect();
        Self { tables }
    }

    /// Canonical table name for a caller-supplied one (case-insensitive).
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.tables
            .get(&name.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Every known table, sorted by name.
    pub fn tables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.values().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
