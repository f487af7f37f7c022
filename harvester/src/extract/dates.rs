use crate::HarvestError;
use chrono::NaiveDate;

pub const PORTAL_DATE_FORMAT: &str = "%d/%m/%Y";

/// Parse a portal date cell (`dd/mm/yyyy`). A trailing time component such as
/// `14/02/2024 10:31:07` is ignored.
pub fn parse_portal_date(text: &str) -> Result<NaiveDate, HarvestError> {
    let date_part = text.split_whitespace().next().unwrap_or_default();
    NaiveDate::parse_from_str(date_part, PORTAL_DATE_FORMAT)
        .map_err(|e| HarvestError::ParseFailure(format!("'{}' is not a dd/mm/yyyy date: {e}", text.trim())))
}

pub fn format_portal_date(date: NaiveDate) -> String {
    date.format(PORTAL_DATE_FORMAT).to_string()
}
