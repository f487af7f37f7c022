use super::{cell, TabPages};

/// True when any clarification row's status contains one of `pending_markers`
/// (case-insensitive).
pub fn has_pending_clarification(
    pages: &TabPages,
    status_col: usize,
    pending_markers: &[String],
) -> bool {
    let markers: Vec<String> = pending_markers
        .iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect();

    pages.rows().any(|row| {
        cell(row, status_col).is_some_and(|status| {
            let status = status.to_lowercase();
            markers.iter().any(|m| status.contains(m.as_str()))
        })
    })
}
