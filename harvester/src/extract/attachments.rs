use super::dates::parse_portal_date;
use super::{cell, TabPages};
use chrono::NaiveDate;
use tracing::debug;

/// Latest upload date over every attachment row on every page.
/// `None` means "no uploads": the tab was empty or no date cell parsed.
pub fn latest_upload(pages: &TabPages, date_col: usize) -> Option<NaiveDate> {
    pages
        .rows()
        .filter_map(|row| cell(row, date_col))
        .filter_map(|raw| match parse_portal_date(raw) {
            Ok(d) => Some(d),
            Err(e) => {
                debug!("Skipping attachment row: {e}");
                None
            }
        })
        .max()
}
