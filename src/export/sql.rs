use std::fmt::Write as _;

use crate::db::catalog::{ColumnDescriptor, ObjectKind};
use crate::literal::{ident_list, quote_ident, quote_str, sql_literal};
use crate::value::Row;

use super::manifest::{ExportManifest, ObjectSection, TableSection};

/// Rows per multi-row `INSERT`.
pub const ROW_CHUNK_SIZE: usize = 500;

fn comment(out: &mut String, text: &str) {
    for line in text.lines() {
        let _ = writeln!(out, "-- {line}");
    }
}

fn with_terminator(ddl: &str) -> String {
    let trimmed = ddl.trim_end();
    if trimmed.ends_with(';') {
        trimmed.to_string()
    } else {
        format!("{trimmed};")
    }
}

fn write_structure(out: &mut String, section: &TableSection) {
    let table = &section.data.table;
    match &section.ddl {
        None => {}
        Some(Ok(Some(ddl))) => {
            let _ = writeln!(out, "DROP TABLE IF EXISTS {};", quote_ident(table));
            let _ = writeln!(out, "{}", with_terminator(ddl));
        }
        Some(Ok(None)) => comment(out, &format!("error: no definition captured for {table}")),
        Some(Err(err)) => comment(out, &format!("error: {table}: {}", err.message())),
    }
}

fn write_inserts(out: &mut String, table: &str, columns: &[ColumnDescriptor], rows: &[Row]) {
    if rows.is_empty() || columns.is_empty() {
        return;
    }
    let head = format!(
        "INSERT INTO {} ({}) VALUES",
        quote_ident(table),
        ident_list(columns.iter().map(|c| c.name.as_str()))
    );
    for chunk in rows.chunks(ROW_CHUNK_SIZE) {
        out.push_str(&head);
        out.push('\n');
        let tuples: Vec<String> = chunk
            .iter()
            .map(|row| {
                let values: Vec<String> = columns
                    .iter()
                    .map(|c| row.get(&c.name).map(sql_literal).unwrap_or_else(|| "NULL".into()))
                    .collect();
                format!("({})", values.join(", "))
            })
            .collect();
        out.push_str(&tuples.join(",\n"));
        out.push_str(";\n");
    }
}

fn write_table(out: &mut String, section: &TableSection, replace_data: bool) {
    let data = &section.data;
    let _ = writeln!(out, "\n-- Tabla: {}", data.table);
    write_structure(out, section);
    match &data.rows {
        Ok(rows) => {
            if replace_data {
                let _ = writeln!(out, "DELETE FROM {};", quote_ident(&data.table));
                if section.resets_sequence {
                    let _ = writeln!(
                        out,
                        "DELETE FROM sqlite_sequence WHERE name = {};",
                        quote_str(&data.table)
                    );
                }
            }
            write_inserts(out, &data.table, &data.columns, rows);
        }
        Err(err) => comment(out, &format!("error: {}: {}", data.table, err.message())),
    }
}

fn write_objects(out: &mut String, section: &ObjectSection) {
    let heading = match section.kind {
        ObjectKind::View => "Vistas",
        ObjectKind::Trigger => "Triggers",
        ObjectKind::Routine => "Rutinas",
        ObjectKind::Table => "Tablas",
    };
    let _ = writeln!(out, "\n-- {heading}");
    let definitions = match &section.definitions {
        Ok(definitions) => definitions,
        Err(err) => {
            comment(out, &format!("error: {}", err.message()));
            return;
        }
    };
    if section.kind == ObjectKind::Routine && definitions.is_empty() {
        comment(out, "SQLite has no stored routines");
        return;
    }
    for (name, ddl) in definitions {
        match ddl {
            Some(ddl) => {
                let _ = writeln!(
                    out,
                    "DROP {} IF EXISTS {};",
                    section.kind.as_str().to_ascii_uppercase(),
                    quote_ident(name)
                );
                let _ = writeln!(out, "{}", with_terminator(ddl));
            }
            None => comment(out, &format!("error: no definition captured for {name}")),
        }
    }
}

/// Renders a SQL dump. Data is bracketed by `PRAGMA foreign_keys` so the
/// inserts need not follow dependency order; views and triggers follow the
/// data so triggers do not fire while it is restored.
pub fn render(manifest: &ExportManifest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "-- faena SQL dump");
    let _ = writeln!(out, "-- generado_en: {}", manifest.generated_at_text());
    let _ = writeln!(out, "-- version_formato: {}", manifest.format_version);
    if let Some(scope) = manifest.scope_id {
        let _ = writeln!(out, "-- id_proyecto: {scope}");
    }
    out.push_str("\nPRAGMA foreign_keys = OFF;\n");

    for section in &manifest.tables {
        write_table(&mut out, section, manifest.replace_data);
    }

    out.push_str("\nPRAGMA foreign_keys = ON;\n");

    for section in &manifest.objects {
        write_objects(&mut out, section);
    }
    out
}
