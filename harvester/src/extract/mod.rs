//! Per-tab extraction rules.
//!
//! Every extractor is a pure function over the rows a tab rendered, across all
//! of its pages. The navigator does the reading; nothing here touches the
//! browser, which keeps the selection rules testable in isolation.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod adjustment_term;
pub mod adjustments;
pub mod attachments;
pub mod clarifications;
pub mod dates;

pub use adjustment_term::{latest_term_request, TermRequest};
pub use adjustments::{authoritative_adjustment, Adjustment};
pub use attachments::latest_upload;
pub use clarifications::has_pending_clarification;

/// The portal's content sections for one instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tab {
    Adjustments,
    AdjustmentTerm,
    Attachments,
    Clarifications,
}

impl Tab {
    /// The order tabs are visited in unless configured otherwise
    pub const SEQUENCE: [Tab; 4] = [
        Tab::Adjustments,
        Tab::AdjustmentTerm,
        Tab::Attachments,
        Tab::Clarifications,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Tab::Adjustments => "Adjustments",
            Tab::AdjustmentTerm => "Adjustment-Term",
            Tab::Attachments => "Attachments",
            Tab::Clarifications => "Clarifications",
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One table row as rendered text cells
pub type Row = Vec<String>;

/// Everything a tab rendered, page by page.
///
/// `None` from the navigator means the tab's container never appeared, which
/// is the portal's way of saying there is nothing to show.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabPages {
    pub pages: Vec<Vec<Row>>,
}

impl TabPages {
    pub fn new(pages: Vec<Vec<Row>>) -> Self {
        Self { pages }
    }

    pub fn single(rows: Vec<Row>) -> Self {
        Self { pages: vec![rows] }
    }

    /// Rows of every page in display order
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.pages.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().next().is_none()
    }
}

/// Cell at `index`, trimmed, or `None` when the row is too short or the cell blank
pub(crate) fn cell(row: &Row, index: usize) -> Option<&str> {
    row.get(index).map(|c| c.trim()).filter(|c| !c.is_empty())
}
