use ::csv::{Terminator, WriterBuilder};

use crate::db::fetch::TableOutcome;
use crate::value::SqlValue;
use crate::AppResult;

/// Flat single-table CSV with a header row and CRLF records. A failed read
/// has nowhere to go inline, so it is returned as the error.
pub fn render(outcome: &TableOutcome) -> AppResult<Vec<u8>> {
    let rows = outcome.rows.as_ref().map_err(|err| {
        err.clone().with_context("table", outcome.table.clone())
    })?;
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(outcome.columns.iter().map(|c| c.name.as_str()))?;
    for row in rows {
        writer.write_record(
            outcome
                .columns
                .iter()
                .map(|c| row.get(&c.name).map(SqlValue::render).unwrap_or_default()),
        )?;
    }
    let body = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(body)
}
