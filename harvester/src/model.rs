use crate::extract::dates::format_portal_date;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Strip what spreadsheet numeric coercion and sloppy data entry leave behind:
/// surrounding whitespace and a trailing `.0`.
pub fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_suffix(".0")
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Values the spreadsheet layer produces for empty cells
pub fn is_null_marker(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("nan") || v.eq_ignore_ascii_case("none")
}

/// One instrument to look up, as read from the input sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentRecord {
    pub identifier: String,
    /// Every cell of the input row, keyed by header
    pub row: BTreeMap<String, String>,
    /// 1-based spreadsheet line (the header is line 1)
    pub line: usize,
}

impl InstrumentRecord {
    pub fn new(identifier: &str, row: BTreeMap<String, String>, line: usize) -> Self {
        Self {
            identifier: normalize_identifier(identifier),
            row,
            line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Partial,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Partial => "partial",
            ResultStatus::Error => "error",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields gathered from the tabs of one instrument
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabFields {
    pub adjustment_number: Option<String>,
    pub adjustment_status: Option<String>,
    pub latest_term_request: Option<NaiveDate>,
    pub latest_term_status: Option<String>,
    pub latest_attachment_upload: Option<NaiveDate>,
    /// `None` when the clarifications tab could not be read
    pub pending_clarification: Option<bool>,
}

/// What one run learned about one instrument. Never edited after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub identifier: String,
    pub fields: TabFields,
    pub status: ResultStatus,
    pub detail: Option<String>,
    pub extracted_at: DateTime<Local>,
    /// Configured input columns carried onto the output row
    pub passthrough: Vec<(String, String)>,
}

pub const COL_INSTRUMENT: &str = "Instrument";
pub const COL_STATUS: &str = "Status";

/// Fixed output columns, in order; pass-through columns follow them
pub const OUTPUT_COLUMNS: [&str; 10] = [
    COL_INSTRUMENT,
    "Adjustment No.",
    "Adjustment Status",
    "Latest Term Request",
    "Latest Term Status",
    "Latest Attachment Upload",
    "Pending Clarification",
    COL_STATUS,
    "Detail",
    "Extracted At",
];

impl ExtractionResult {
    /// Column/value pairs for the output sheet
    pub fn to_row(&self) -> Vec<(String, String)> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        let date = |d: &Option<NaiveDate>| d.map(format_portal_date).unwrap_or_default();
        let f = &self.fields;

        let values = [
            self.identifier.clone(),
            opt(&f.adjustment_number),
            opt(&f.adjustment_status),
            date(&f.latest_term_request),
            opt(&f.latest_term_status),
            date(&f.latest_attachment_upload),
            match f.pending_clarification {
                Some(true) => "yes".to_string(),
                Some(false) => "no".to_string(),
                None => String::new(),
            },
            self.status.to_string(),
            opt(&self.detail),
            self.extracted_at.format("%d/%m/%Y %H:%M:%S").to_string(),
        ];

        let mut row: Vec<(String, String)> = OUTPUT_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .zip(values)
            .collect();
        row.extend(self.passthrough.iter().cloned());
        row
    }
}
