use super::read_numbered_table;
use crate::model::{is_null_marker, InstrumentRecord};
use crate::HarvestError;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Load the instrument list from the first sheet of `path`.
///
/// Rows whose identifier cell is empty or a null marker are skipped with a
/// warning. Input order is preserved and duplicates are kept; the
/// orchestrator decides what to do with them.
pub fn read_instruments(
    path: &Path,
    identifier_column: &str,
) -> Result<Vec<InstrumentRecord>, HarvestError> {
    let (table, lines) = read_numbered_table(path)?;
    info!(
        path = %path.display(),
        columns = ?table.headers,
        rows = table.rows.len(),
        "Loaded input sheet"
    );

    let Some(id_col) = table.column(identifier_column) else {
        return Err(HarvestError::Spreadsheet(format!(
            "column '{}' not found in {} (available: {})",
            identifier_column,
            path.display(),
            table.headers.join(", ")
        )));
    };

    let mut records = Vec::with_capacity(table.rows.len());
    for (line, cells) in lines.into_iter().zip(table.rows) {
        let raw = cells.get(id_col).map(String::as_str).unwrap_or_default();
        if is_null_marker(raw) {
            warn!(line, "Skipping row without an instrument identifier");
            continue;
        }
        let row: BTreeMap<String, String> = table
            .headers
            .iter()
            .cloned()
            .zip(cells.iter().cloned())
            .collect();
        records.push(InstrumentRecord::new(raw, row, line));
    }
    Ok(records)
}
