use super::dates::parse_portal_date;
use super::{cell, TabPages};
use chrono::NaiveDate;
use tracing::debug;

/// Most recent adjustment-term request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermRequest {
    pub requested_on: NaiveDate,
    pub status: Option<String>,
}

/// The request with the greatest request date across every page. The table's
/// own ordering is not trusted; equal dates resolve to the row shown last.
pub fn latest_term_request(
    pages: &TabPages,
    date_col: usize,
    status_col: usize,
) -> Option<TermRequest> {
    let mut latest: Option<TermRequest> = None;

    for row in pages.rows() {
        let Some(raw) = cell(row, date_col) else {
            continue;
        };
        let requested_on = match parse_portal_date(raw) {
            Ok(d) => d,
            Err(e) => {
                debug!("Skipping adjustment-term row: {e}");
                continue;
            }
        };
        if latest
            .as_ref()
            .map_or(true, |current| requested_on >= current.requested_on)
        {
            latest = Some(TermRequest {
                requested_on,
                status: cell(row, status_col).map(str::to_string),
            });
        }
    }

    latest
}
