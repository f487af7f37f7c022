//! Spreadsheet I/O: input instrument list and append-only output sheet.
//!
//! `.csv` goes through the `csv` crate; workbook formats are read with
//! `calamine` and written with `rust_xlsxwriter`. Only the first worksheet is
//! used.

use crate::HarvestError;
use std::path::Path;

pub mod input;
pub mod output;

pub use input::read_instruments;
pub use output::{OutputSheet, OutputSummary};

/// A header row plus data rows, all as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Index of the column named `name`, falling back to a case- and
    /// whitespace-insensitive match.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name).or_else(|| {
            let wanted = name.trim().to_lowercase();
            self.headers
                .iter()
                .position(|h| h.trim().to_lowercase() == wanted)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SheetFormat {
    Csv,
    Workbook,
}

fn format_of(path: &Path) -> Result<SheetFormat, HarvestError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => Ok(SheetFormat::Csv),
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(SheetFormat::Workbook),
        _ => Err(HarvestError::Spreadsheet(format!(
            "unsupported spreadsheet type '{}' (use .xlsx or .csv)",
            path.display()
        ))),
    }
}

/// Read the first sheet of `path`. The first row is the header.
pub fn read_table(path: &Path) -> Result<Table, HarvestError> {
    read_numbered_table(path).map(|(table, _)| table)
}

/// Like `read_table`, also returning the 1-based spreadsheet line of every
/// data row. Blank rows are dropped but still counted.
pub fn read_numbered_table(path: &Path) -> Result<(Table, Vec<usize>), HarvestError> {
    let mut rows = match format_of(path)? {
        SheetFormat::Csv => read_csv(path)?,
        SheetFormat::Workbook => read_workbook(path)?,
    }
    .into_iter();

    let headers: Vec<String> = rows
        .next()
        .map(|(_, cells)| cells)
        .unwrap_or_default()
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    let width = headers.len();
    let (lines, rows): (Vec<usize>, Vec<Vec<String>>) = rows
        // trailing blank lines are common in hand-edited sheets
        .filter(|(_, r)| r.iter().any(|c| !c.trim().is_empty()))
        .map(|(line, mut r)| {
            r.resize(width.max(r.len()), String::new());
            (line, r)
        })
        .unzip();
    Ok((Table { headers, rows }, lines))
}

fn read_csv(path: &Path) -> Result<Vec<(usize, Vec<String>)>, HarvestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        // the reader skips empty lines, so take the line from the record itself
        let line = record.position().map_or(idx + 1, |p| p.line() as usize);
        rows.push((line, record.iter().map(str::to_string).collect()));
    }
    Ok(rows)
}

fn read_workbook(path: &Path) -> Result<Vec<(usize, Vec<String>)>, HarvestError> {
    use calamine::Reader;

    let mut workbook = calamine::open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| HarvestError::Spreadsheet(format!("{} has no worksheets", path.display())))??;
    // the range starts at the first used cell, not necessarily row 1
    let first_row = range.start().map_or(0, |(row, _)| row as usize);
    Ok(range
        .rows()
        .enumerate()
        .map(|(idx, row)| {
            (
                first_row + idx + 1,
                row.iter().map(|cell| cell.to_string()).collect(),
            )
        })
        .collect())
}

/// Replace `path` with `table`, going through a temporary file in the same
/// directory so readers never see a half-written sheet.
pub fn write_table(path: &Path, table: &Table) -> Result<(), HarvestError> {
    let bytes = match format_of(path)? {
        SheetFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(&table.headers)?;
            for row in &table.rows {
                writer.write_record(row)?;
            }
            writer
                .into_inner()
                .map_err(|e| HarvestError::Spreadsheet(e.to_string()))?
        }
        SheetFormat::Workbook => {
            if !path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"))
            {
                return Err(HarvestError::Spreadsheet(format!(
                    "cannot write {}: workbooks are written as .xlsx only",
                    path.display()
                )));
            }
            let mut workbook = rust_xlsxwriter::Workbook::new();
            let sheet = workbook.add_worksheet();
            for (col, header) in table.headers.iter().enumerate() {
                sheet.write_string(0, col as u16, header)?;
            }
            for (r, row) in table.rows.iter().enumerate() {
                for (col, value) in row.iter().enumerate() {
                    if !value.is_empty() {
                        sheet.write_string(r as u32 + 1, col as u16, value)?;
                    }
                }
            }
            workbook.save_to_buffer()?
        }
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, &bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        HarvestError::Spreadsheet(format!("cannot replace {}: {}", path.display(), e.error))
    })?;
    Ok(())
}
