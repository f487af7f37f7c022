use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Element did not appear in time: {0}")]
    ElementTimeout(String),

    #[error("Navigation failed: {0}")]
    NavigationFailure(String),

    #[error("Could not parse value: {0}")]
    ParseFailure(String),

    #[error("Browser session unusable: {0}")]
    SessionFailure(String),

    #[error("Element is detached from the page: {0}")]
    StaleElement(String),

    #[error("Page script error: {0}")]
    Script(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Errors that make continuing the run pointless: the browser session is
    /// gone, or progress can no longer be made durable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::SessionFailure(_) | HarvestError::Checkpoint(_)
        )
    }
}

impl From<calamine::Error> for HarvestError {
    fn from(e: calamine::Error) -> Self {
        HarvestError::Spreadsheet(e.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for HarvestError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        HarvestError::Spreadsheet(e.to_string())
    }
}

impl From<csv::Error> for HarvestError {
    fn from(e: csv::Error) -> Self {
        HarvestError::Spreadsheet(e.to_string())
    }
}
