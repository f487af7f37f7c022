//! Run configuration.
//!
//! Everything that used to be a hard-coded path or sleep lives here and is
//! handed to the orchestrator explicitly. Values come from an optional YAML
//! file; the CLI layers flag and environment overrides on top.

use crate::extract::Tab;
use crate::locator::{WaitPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use crate::HarvestError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub mod duration;
pub mod layout;

pub use layout::{ColumnLayout, PortalLayout, TabLayout};

pub const DEFAULT_DEVTOOLS_ENDPOINT: &str = "127.0.0.1:9222";
pub const DEFAULT_IDENTIFIER_COLUMN: &str = "Instrumento nº";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub checkpoint_path: PathBuf,
    /// Header of the input column holding instrument identifiers
    pub identifier_column: String,
    /// Input columns copied verbatim onto every output row
    pub passthrough_columns: Vec<String>,
    /// Budget for each element wait
    #[serde(with = "duration")]
    pub wait_timeout: Duration,
    #[serde(with = "duration")]
    pub poll_interval: Duration,
    /// Budget for the search result to show up (the portal's search is slow)
    #[serde(with = "duration")]
    pub search_timeout: Duration,
    /// Upper bound on any single DevTools round trip
    #[serde(with = "duration")]
    pub command_timeout: Duration,
    pub tab_sequence: Vec<Tab>,
    /// Output rows are written after this many processed instruments
    pub flush_every: usize,
    /// Extra passes over instruments that failed during this run
    pub retry_passes: u32,
    /// Pagination cap per tab
    pub max_pages: usize,
    pub devtools_endpoint: String,
    /// Attach to the first open page whose URL contains this
    pub page_url_pattern: Option<String>,
    pub layout: PortalLayout,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("input.xlsx"),
            output_path: PathBuf::from("output.xlsx"),
            checkpoint_path: PathBuf::from("checkpoint.json"),
            identifier_column: DEFAULT_IDENTIFIER_COLUMN.to_string(),
            passthrough_columns: vec!["Técnico".to_string(), "e-mail do Técnico".to_string()],
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            search_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            tab_sequence: Tab::SEQUENCE.to_vec(),
            flush_every: 1,
            retry_passes: 1,
            max_pages: 50,
            devtools_endpoint: DEFAULT_DEVTOOLS_ENDPOINT.to_string(),
            page_url_pattern: None,
            layout: PortalLayout::default(),
        }
    }
}

impl HarvestConfig {
    /// Load a YAML config file. Relative data paths are resolved against the
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self, HarvestError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config: HarvestConfig = serde_yaml::from_str(&text)
            .map_err(|e| HarvestError::Config(format!("{}: {e}", path.display())))?;

        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            for p in [
                &mut config.input_path,
                &mut config.output_path,
                &mut config.checkpoint_path,
            ] {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        }
        debug!(?path, "Loaded configuration");
        Ok(config)
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            timeout: self.wait_timeout,
            poll_interval: self.poll_interval,
        }
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.tab_sequence.is_empty() {
            return Err(HarvestError::Config("tab_sequence is empty".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.tab_sequence.iter().find(|t| !seen.insert(**t)) {
            return Err(HarvestError::Config(format!(
                "tab {dup} appears more than once in tab_sequence"
            )));
        }
        for (name, value) in [
            ("wait_timeout", self.wait_timeout),
            ("poll_interval", self.poll_interval),
            ("search_timeout", self.search_timeout),
            ("command_timeout", self.command_timeout),
        ] {
            if value.is_zero() {
                return Err(HarvestError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.flush_every == 0 {
            return Err(HarvestError::Config("flush_every must be at least 1".into()));
        }
        if self.max_pages == 0 {
            return Err(HarvestError::Config("max_pages must be at least 1".into()));
        }
        if self.identifier_column.trim().is_empty() {
            return Err(HarvestError::Config("identifier_column is empty".into()));
        }
        if let Some(bad) = self.layout.selectors().into_iter().find(|s| !s.is_valid()) {
            return Err(HarvestError::Config(format!("invalid layout selector {bad}")));
        }
        Ok(())
    }
}
