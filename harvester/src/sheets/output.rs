use super::{read_table, write_table, Table};
use crate::model::{normalize_identifier, ExtractionResult, ResultStatus, COL_INSTRUMENT, COL_STATUS};
use crate::HarvestError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The append-only result sheet.
///
/// Every append loads what is already on disk, concatenates the new rows and
/// rewrites the whole file. Rows from earlier runs are never dropped or
/// edited.
#[derive(Debug, Clone)]
pub struct OutputSheet {
    path: PathBuf,
}

impl OutputSheet {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Table, HarvestError> {
        if self.path.exists() {
            read_table(&self.path)
        } else {
            Ok(Table::default())
        }
    }

    /// Append `results`; returns the number of rows now in the sheet.
    pub fn append(&self, results: &[ExtractionResult]) -> Result<usize, HarvestError> {
        let mut table = self.load()?;
        if results.is_empty() {
            return Ok(table.rows.len());
        }
        let existing = table.rows.len();

        for result in results {
            let pairs = result.to_row();
            for (column, _) in &pairs {
                if table.column(column).is_none() {
                    table.headers.push(column.clone());
                }
            }
            let mut row = vec![String::new(); table.headers.len()];
            for (column, value) in pairs {
                if let Some(idx) = table.column(&column) {
                    row[idx] = value;
                }
            }
            table.rows.push(row);
        }
        let width = table.headers.len();
        for row in &mut table.rows {
            row.resize(width, String::new());
        }

        write_table(&self.path, &table)?;
        debug!(
            path = %self.path.display(),
            existing,
            appended = results.len(),
            "Output sheet written"
        );
        Ok(table.rows.len())
    }

    /// Identifier and status of every row currently in the sheet.
    pub fn summary(&self) -> Result<OutputSummary, HarvestError> {
        let table = self.load()?;
        let mut summary = OutputSummary::default();
        let Some(id_col) = table.column(COL_INSTRUMENT) else {
            return Ok(summary);
        };
        let status_col = table.column(COL_STATUS);
        for row in &table.rows {
            let id = normalize_identifier(&row[id_col]);
            if id.is_empty() {
                continue;
            }
            let status = status_col
                .map(|c| row[c].trim().to_lowercase())
                .unwrap_or_default();
            summary.rows += 1;
            summary.statuses.entry(id).or_default().push(status);
        }
        Ok(summary)
    }
}

/// What the output sheet holds, per identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSummary {
    pub rows: usize,
    /// Status text of each row, in sheet order
    pub statuses: BTreeMap<String, Vec<String>>,
}

impl OutputSummary {
    pub fn contains(&self, identifier: &str) -> bool {
        self.statuses.contains_key(identifier)
    }

    /// True when the identifier has rows and every one of them is `error`
    pub fn only_errors(&self, identifier: &str) -> bool {
        self.statuses.get(identifier).is_some_and(|s| {
            !s.is_empty() && s.iter().all(|st| st == ResultStatus::Error.as_str())
        })
    }
}
