use super::{cell, TabPages};
use crate::HarvestError;
use tracing::debug;

/// The adjustment that speaks for the instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    /// Adjustment number as the portal renders it (e.g. `3/2024`)
    pub number: String,
    pub status: Option<String>,
}

/// Numeric part of an adjustment number: the first run of digits before any `/`.
pub fn adjustment_ordinal(number: &str) -> Result<u64, HarvestError> {
    let head = number.split('/').next().unwrap_or_default();
    let digits: String = head
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse()
        .map_err(|_| HarvestError::ParseFailure(format!("adjustment number '{number}'")))
}

/// Row with the numerically largest adjustment number. Equal numbers resolve to
/// the row shown last. Rows whose number does not parse are ignored.
pub fn authoritative_adjustment(
    pages: &TabPages,
    number_col: usize,
    status_col: usize,
) -> Option<Adjustment> {
    let mut best: Option<(u64, Adjustment)> = None;

    for row in pages.rows() {
        let Some(raw) = cell(row, number_col) else {
            continue;
        };
        let ordinal = match adjustment_ordinal(raw) {
            Ok(n) => n,
            Err(e) => {
                debug!("Skipping adjustment row: {e}");
                continue;
            }
        };
        // `>=` so a later row wins a tie
        if best.as_ref().map_or(true, |(current, _)| ordinal >= *current) {
            best = Some((
                ordinal,
                Adjustment {
                    number: raw.to_string(),
                    status: cell(row, status_col).map(str::to_string),
                },
            ));
        }
    }

    best.map(|(_, adjustment)| adjustment)
}
