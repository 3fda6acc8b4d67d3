use serde_json::{json, Map, Value};

use super::manifest::ExportManifest;
use crate::AppResult;

/// `{metadata: {...}, tablas: {table: [rows] | {error}}}`.
pub fn envelope(manifest: &ExportManifest) -> Value {
    let mut metadata = Map::new();
    if let Some(scope) = manifest.scope_id {
        metadata.insert("id_proyecto".into(), Value::from(scope));
    }
    metadata.insert("generado_en".into(), Value::from(manifest.generated_at_text()));
    metadata.insert("version_formato".into(), Value::from(manifest.format_version));
    metadata.insert("tablas".into(), json!(manifest.table_names()));

    let tables: Map<String, Value> = manifest
        .tables
        .iter()
        .map(|section| {
            let data = &section.data;
            let body = match &data.rows {
                Ok(rows) => Value::Array(rows.iter().map(|r| Value::Object(r.to_json())).collect()),
                Err(err) => json!({ "error": err.message() }),
            };
            (data.table.clone(), body)
        })
        .collect();

    json!({ "metadata": metadata, "tablas": tables })
}

pub fn render(manifest: &ExportManifest) -> AppResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&envelope(manifest))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fetch::TableOutcome;
    use crate::export::manifest::TableSection;
    use crate::value::{Row, SqlValue};
    use crate::AppError;

    #[test]
    fn failed_tables_are_kept_with_their_error() {
        let mut manifest = ExportManifest::new(Some(1));
        let mut row = Row::new();
        row.push("id_nomina", SqlValue::Integer(4));
        row.push("cerrada", SqlValue::Bool(true));
        manifest.tables.push(TableSection {
            data: TableOutcome {
                table: "nominas".into(),
                columns: Vec::new(),
                rows: Ok(vec![row]),
            },
            ddl: None,
            resets_sequence: false,
        });
        manifest.tables.push(TableSection {
            data: TableOutcome {
                table: "herramientas".into(),
                columns: Vec::new(),
                rows: Err(AppError::new("Sqlite/1", "no such table: herramientas")),
            },
            ddl: None,
            resets_sequence: false,
        });

        let value = envelope(&manifest);
        assert_eq!(value["metadata"]["id_proyecto"], 1);
        assert_eq!(value["metadata"]["version_formato"], "1.0");
        assert_eq!(value["metadata"]["tablas"], json!(["nominas", "herramientas"]));
        assert_eq!(value["tablas"]["nominas"][0]["cerrada"], true);
        assert_eq!(
            value["tablas"]["herramientas"]["error"],
            "no such table: herramientas"
        );
    }

    #[test]
    fn unscoped_exports_omit_project_id() {
        let manifest = ExportManifest::new(None);
        let value = envelope(&manifest);
        assert!(value["metadata"].get("id_proyecto").is_none());
        assert_eq!(value["tablas"], json!({}));
    }
}
