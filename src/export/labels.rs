//! Human-readable labels for foreign-key id columns.
//!
//! Enrichment is column-driven: each recognised id column in a batch loads
//! its referenced table once, and every row is then resolved from that
//! in-memory map. Source rows are left untouched; enriched rows are copies
//! with one alias column appended per resolved mapping.

use std::collections::HashMap;

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::db::catalog::ColumnDescriptor;
use crate::db::fetch::{self, TableOutcome};
use crate::value::{Row, SqlValue};

#[derive(Clone, Copy)]
pub enum LabelSource {
    Field(&'static str),
    Compose(fn(&Row) -> Option<String>),
}

impl std::fmt::Debug for LabelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelSource::Field(field) => f.debug_tuple("Field").field(field).finish(),
            LabelSource::Compose(_) => f.write_str("Compose(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FkMapping {
    pub column: &'static str,
    pub target_table: &'static str,
    pub target_id: &'static str,
    pub label: LabelSource,
    pub alias: &'static str,
}

fn employee_name(row: &Row) -> Option<String> {
    let part = |column| {
        row.get(column)
            .filter(|v| !v.is_null())
            .map(SqlValue::render)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    match (part("nombre"), part("apellido")) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (first, last) => first.or(last),
    }
}

pub const FK_MAPPINGS: &[FkMapping] = &[
    FkMapping {
        column: "id_proveedor",
        target_table: "proveedores",
        target_id: "id_proveedor",
        label: LabelSource::Field("nombre"),
        alias: "proveedor_nombre",
    },
    FkMapping {
        column: "id_empleado",
        target_table: "empleados",
        target_id: "id_empleado",
        label: LabelSource::Compose(employee_name),
        alias: "empleado_nombre",
    },
    FkMapping {
        column: "id_proyecto",
        target_table: "proyectos",
        target_id: "id_proyecto",
        label: LabelSource::Field("nombre"),
        alias: "proyecto_nombre",
    },
    FkMapping {
        column: "id_herramienta",
        target_table: "herramientas",
        target_id: "id_herramienta",
        label: LabelSource::Field("nombre"),
        alias: "herramienta_nombre",
    },
    FkMapping {
        column: "id_nomina",
        target_table: "nominas",
        target_id: "id_nomina",
        label: LabelSource::Field("periodo"),
        alias: "nomina_periodo",
    },
    FkMapping {
        column: "id_presupuesto",
        target_table: "presupuestos",
        target_id: "id_presupuesto",
        label: LabelSource::Field("descripcion"),
        alias: "presupuesto_descripcion",
    },
];

pub fn mapping_for(column: &str) -> Option<&'static FkMapping> {
    FK_MAPPINGS.iter().find(|m| m.column == column)
}

/// Mappings that apply to rows of `table` with the given columns.
fn applicable(table: &str, columns: &[&str]) -> Vec<&'static FkMapping> {
    columns
        .iter()
        .filter_map(|column| mapping_for(column))
        .filter(|m| m.target_table != table)
        .filter(|m| !columns.contains(&m.alias))
        .collect()
}

fn placeholder(key: &str) -> String {
    format!("[{key}]")
}

async fn load_labels(
    conn: &mut SqliteConnection,
    mapping: &FkMapping,
) -> Option<HashMap<String, String>> {
    let outcome = fetch::fetch_isolated(conn, mapping.target_table, None).await;
    let rows = match outcome.rows {
        Ok(rows) => rows,
        Err(err) => {
            warn!(
                target: "faena",
                event = "fk_labels_skipped",
                column = mapping.column,
                target_table = mapping.target_table,
                error = %err
            );
            return None;
        }
    };
    let labels = rows
        .iter()
        .filter_map(|row| {
            let key = row.get(mapping.target_id)?.lookup_key()?;
            // A row that exists but has no label text still resolves, just empty.
            let label = match mapping.label {
                LabelSource::Field(field) => row.get(field).map(SqlValue::render),
                LabelSource::Compose(compose) => compose(row),
            }
            .unwrap_or_default();
            Some((key, label))
        })
        .collect();
    Some(labels)
}

/// Resolves labels for `rows`, returning enriched copies and the alias
/// columns that were added. Rows are returned unchanged (as copies) when no
/// mapping applies.
pub async fn enrich(
    conn: &mut SqliteConnection,
    table: &str,
    rows: &[Row],
) -> (Vec<Row>, Vec<&'static str>) {
    let Some(first) = rows.first() else {
        return (Vec::new(), Vec::new());
    };
    let columns: Vec<&str> = first.columns().collect();

    let mut resolved: Vec<(&'static FkMapping, HashMap<String, String>)> = Vec::new();
    for mapping in applicable(table, &columns) {
        if let Some(labels) = load_labels(conn, mapping).await {
            debug!(
                target: "faena",
                event = "fk_labels_loaded",
                table,
                column = mapping.column,
                labels = labels.len()
            );
            resolved.push((mapping, labels));
        }
    }

    let enriched = rows
        .iter()
        .map(|row| {
            let mut copy = row.clone();
            for (mapping, labels) in &resolved {
                let Some(key) = row.get(mapping.column).and_then(SqlValue::lookup_key) else {
                    continue;
                };
                let label = labels
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| placeholder(&key));
                copy.push(mapping.alias, SqlValue::Text(label));
            }
            copy
        })
        .collect();

    (enriched, resolved.iter().map(|(m, _)| m.alias).collect())
}

/// Enriched copy of a table read. Failed reads pass through unchanged.
pub async fn enrich_outcome(conn: &mut SqliteConnection, outcome: &TableOutcome) -> TableOutcome {
    let rows = match &outcome.rows {
        Ok(rows) => rows,
        Err(_) => return outcome.clone(),
    };
    let (rows, aliases) = enrich(conn, &outcome.table, rows).await;
    let mut columns = outcome.columns.clone();
    columns.extend(aliases.into_iter().map(ColumnDescriptor::text));
    TableOutcome {
        table: outcome.table.clone(),
        columns,
        rows: Ok(rows),
    }
}
