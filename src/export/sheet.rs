//! Minimal Office Open XML workbook writer: one worksheet per table, a bold
//! header row, inline strings and auto-sized columns.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::manifest::ExportManifest;
use crate::db::fetch::TableOutcome;
use crate::value::SqlValue;
use crate::AppError;

/// Longest sheet name a workbook accepts.
pub const MAX_SHEET_NAME: usize = 31;
const MIN_COLUMN_WIDTH: usize = 10;
const MAX_COLUMN_WIDTH: usize = 80;
const HEADER_STYLE: u8 = 1;
const EMPTY_WORKBOOK_SHEET: &str = "Sin datos";

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("failed to assemble workbook archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to write workbook part: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SheetError> for AppError {
    fn from(err: SheetError) -> Self {
        let message = err.to_string();
        let app = match err {
            SheetError::Zip(inner) => AppError::from(inner),
            SheetError::Io(inner) => AppError::from(inner),
        };
        AppError::new("EXPORT/SHEET", message).with_cause(app)
    }
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(ch),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

/// `0 → A`, `25 → Z`, `26 → AA`.
fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Valid, unique sheet name derived from a table name.
fn sheet_name(table: &str, taken: &mut HashSet<String>) -> String {
    let cleaned: String = table
        .chars()
        .map(|c| match c {
            ':' | '\\' | '/' | '?' | '*' | '[' | ']' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('\'');
    let base: String = if cleaned.is_empty() {
        "Hoja".to_string()
    } else {
        cleaned.chars().take(MAX_SHEET_NAME).collect()
    };

    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&candidate.to_lowercase()) {
        let suffix = format!("~{n}");
        let keep = MAX_SHEET_NAME - suffix.chars().count();
        candidate = base.chars().take(keep).collect::<String>() + &suffix;
        n += 1;
    }
    taken.insert(candidate.to_lowercase());
    candidate
}

enum Cell {
    Empty,
    Number(String),
    Bool(bool),
    Text(String),
}

impl Cell {
    fn from_value(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => Cell::Empty,
            SqlValue::Real(v) if !v.is_finite() => Cell::Empty,
            SqlValue::Integer(_) | SqlValue::Real(_) => Cell::Number(value.render()),
            SqlValue::Bool(v) => Cell::Bool(*v),
            other => Cell::Text(other.render()),
        }
    }

    fn width(&self) -> usize {
        match self {
            Cell::Empty => 0,
            Cell::Bool(true) => 4,
            Cell::Bool(false) => 5,
            Cell::Number(text) | Cell::Text(text) => text.chars().count(),
        }
    }

    fn xml(&self, reference: &str, style: Option<u8>) -> String {
        let style = style.map(|s| format!(" s=\"{s}\"")).unwrap_or_default();
        match self {
            Cell::Empty => String::new(),
            Cell::Number(v) => format!("<c r=\"{reference}\"{style}><v>{v}</v></c>"),
            Cell::Bool(v) => {
                format!("<c r=\"{reference}\"{style} t=\"b\"><v>{}</v></c>", u8::from(*v))
            }
            Cell::Text(v) => format!(
                "<c r=\"{reference}\"{style} t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                escape_xml(v)
            ),
        }
    }
}

fn grid(outcome: &TableOutcome) -> (Vec<String>, Vec<Vec<Cell>>) {
    match &outcome.rows {
        Ok(rows) => {
            let header = outcome.columns.iter().map(|c| c.name.clone()).collect();
            let body = rows
                .iter()
                .map(|row| {
                    outcome
                        .columns
                        .iter()
                        .map(|c| row.get(&c.name).map(Cell::from_value).unwrap_or(Cell::Empty))
                        .collect()
                })
                .collect();
            (header, body)
        }
        Err(err) => (
            vec!["error".to_string()],
            vec![vec![Cell::Text(err.message().to_string())]],
        ),
    }
}

fn worksheet_xml(header: &[String], body: &[Vec<Cell>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in body {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(idx) {
                *width = (*width).max(cell.width());
            }
        }
    }

    let mut xml = format!("{XML_DECL}<worksheet xmlns=\"{MAIN_NS}\">");
    if !widths.is_empty() {
        xml.push_str("<cols>");
        for (idx, width) in widths.iter().enumerate() {
            let width = (*width + 2).clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH);
            let n = idx + 1;
            xml.push_str(&format!(
                "<col min=\"{n}\" max=\"{n}\" width=\"{width}\" customWidth=\"1\"/>"
            ));
        }
        xml.push_str("</cols>");
    }

    xml.push_str("<sheetData>");
    let header_cells: Vec<Cell> = header.iter().map(|h| Cell::Text(h.clone())).collect();
    let rows = std::iter::once((&header_cells, Some(HEADER_STYLE)))
        .chain(body.iter().map(|row| (row, None)));
    for (r, (cells, style)) in rows.enumerate() {
        let r = r + 1;
        xml.push_str(&format!("<row r=\"{r}\">"));
        for (c, cell) in cells.iter().enumerate() {
            xml.push_str(&cell.xml(&format!("{}{r}", column_letter(c)), style));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn content_types(sheets: usize) -> String {
    let mut xml = format!(
        "{XML_DECL}<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
<Default Extension=\"xml\" ContentType=\"application/xml\"/>\
<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
<Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>"
    );
    for n in 1..=sheets {
        xml.push_str(&format!(
            "<Override PartName=\"/xl/worksheets/sheet{n}.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>"
        ));
    }
    xml.push_str("</Types>");
    xml
}

fn root_rels() -> String {
    format!(
        "{XML_DECL}<Relationships xmlns=\"{PKG_REL_NS}\">\
<Relationship Id=\"rId1\" Type=\"{REL_NS}/officeDocument\" Target=\"xl/workbook.xml\"/>\
</Relationships>"
    )
}

fn workbook(names: &[String]) -> String {
    let mut xml = format!("{XML_DECL}<workbook xmlns=\"{MAIN_NS}\" xmlns:r=\"{REL_NS}\"><sheets>");
    for (idx, name) in names.iter().enumerate() {
        let n = idx + 1;
        xml.push_str(&format!(
            "<sheet name=\"{}\" sheetId=\"{n}\" r:id=\"rId{n}\"/>",
            escape_xml(name)
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels(sheets: usize) -> String {
    let mut xml = format!("{XML_DECL}<Relationships xmlns=\"{PKG_REL_NS}\">");
    for n in 1..=sheets {
        xml.push_str(&format!(
            "<Relationship Id=\"rId{n}\" Type=\"{REL_NS}/worksheet\" Target=\"worksheets/sheet{n}.xml\"/>"
        ));
    }
    xml.push_str(&format!(
        "<Relationship Id=\"rId{}\" Type=\"{REL_NS}/styles\" Target=\"styles.xml\"/>",
        sheets + 1
    ));
    xml.push_str("</Relationships>");
    xml
}

fn styles() -> String {
    format!(
        "{XML_DECL}<styleSheet xmlns=\"{MAIN_NS}\">\
<fonts count=\"2\"><font><sz val=\"11\"/><name val=\"Calibri\"/></font>\
<font><b/><sz val=\"11\"/><name val=\"Calibri\"/></font></fonts>\
<fills count=\"2\"><fill><patternFill patternType=\"none\"/></fill>\
<fill><patternFill patternType=\"gray125\"/></fill></fills>\
<borders count=\"1\"><border><left/><right/><top/><bottom/><diagonal/></border></borders>\
<cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>\
<cellXfs count=\"2\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/>\
<xf numFmtId=\"0\" fontId=\"1\" fillId=\"0\" borderId=\"0\" xfId=\"0\" applyFont=\"1\"/></cellXfs>\
</styleSheet>"
    )
}

pub fn render(manifest: &ExportManifest) -> Result<Vec<u8>, SheetError> {
    let mut taken = HashSet::new();
    let mut names = Vec::with_capacity(manifest.tables.len().max(1));
    let mut sheets = Vec::with_capacity(manifest.tables.len().max(1));
    for section in &manifest.tables {
        names.push(sheet_name(&section.data.table, &mut taken));
        let (header, body) = grid(&section.data);
        sheets.push(worksheet_xml(&header, &body));
    }
    if sheets.is_empty() {
        names.push(EMPTY_WORKBOOK_SHEET.to_string());
        sheets.push(worksheet_xml(&[], &[]));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let part = |writer: &mut ZipWriter<Cursor<Vec<u8>>>, name: &str, body: &str| {
        writer.start_file(name, options)?;
        writer.write_all(body.as_bytes())?;
        Ok::<(), SheetError>(())
    };

    part(&mut writer, "[Content_Types].xml", &content_types(sheets.len()))?;
    part(&mut writer, "_rels/.rels", &root_rels())?;
    part(&mut writer, "xl/workbook.xml", &workbook(&names))?;
    part(&mut writer, "xl/_rels/workbook.xml.rels", &workbook_rels(sheets.len()))?;
    part(&mut writer, "xl/styles.xml", &styles())?;
    for (idx, sheet) in sheets.iter().enumerate() {
        part(&mut writer, &format!("xl/worksheets/sheet{}.xml", idx + 1), sheet)?;
    }

    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::ColumnDescriptor;
    use crate::export::manifest::TableSection;
    use crate::value::Row;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("archive");
        let mut file = archive.by_name(name).expect("part present");
        let mut out = String::new();
        file.read_to_string(&mut out).expect("read part");
        out
    }

    #[test]
    fn column_letters_roll_over() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn sheet_names_are_truncated_cleaned_and_unique() {
        let mut taken = HashSet::new();
        let long = "movimientos_herramienta_historico_completo";
        let first = sheet_name(long, &mut taken);
        assert_eq!(first.chars().count(), MAX_SHEET_NAME);
        let second = sheet_name(long, &mut taken);
        assert_ne!(first, second);
        assert!(second.ends_with("~2"));
        assert_eq!(second.chars().count(), MAX_SHEET_NAME);
        assert_eq!(sheet_name("a/b[c]", &mut taken), "a_b_c_");
    }

    #[test]
    fn workbook_has_bold_header_and_typed_cells() {
        let mut row = Row::new();
        row.push("nombre", SqlValue::Text("Taladro <18V>".into()));
        row.push("costo", SqlValue::Real(120.5));
        row.push("activo", SqlValue::Bool(true));
        let mut manifest = ExportManifest::new(None);
        manifest.tables.push(TableSection {
            data: TableOutcome {
                table: "herramientas".into(),
                columns: vec![
                    ColumnDescriptor::text("nombre"),
                    ColumnDescriptor::text("costo"),
                    ColumnDescriptor::text("activo"),
                ],
                rows: Ok(vec![row]),
            },
            ddl: None,
            resets_sequence: false,
        });

        let bytes = render(&manifest).expect("xlsx");
        let workbook = read_part(&bytes, "xl/workbook.xml");
        assert!(workbook.contains("<sheet name=\"herramientas\" sheetId=\"1\""));

        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("<c r=\"A1\" s=\"1\" t=\"inlineStr\">"));
        assert!(sheet.contains("Taladro &lt;18V&gt;"));
        assert!(sheet.contains("<c r=\"B2\"><v>120.5</v></c>"));
        assert!(sheet.contains("<c r=\"C2\" t=\"b\"><v>1</v></c>"));
        assert!(sheet.contains("width=\"15\""));
        assert!(read_part(&bytes, "xl/styles.xml").contains("<b/>"));
    }

    #[test]
    fn empty_manifest_still_produces_a_sheet() {
        let bytes = render(&ExportManifest::new(None)).expect("xlsx");
        assert!(read_part(&bytes, "xl/workbook.xml").contains(EMPTY_WORKBOOK_SHEET));
        assert!(read_part(&bytes, "[Content_Types].xml").contains("sheet1.xml"));
    }
}
