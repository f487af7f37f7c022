//! Resumable record harvesting from a multi-tab web portal
//!
//! The crate attaches to an already-authenticated Chromium browser, searches
//! the portal for each instrument of an input spreadsheet, reads its tabs and
//! appends one row per instrument to an output spreadsheet. Progress is kept
//! in a checkpoint file so an interrupted run picks up where it stopped.

use std::sync::Arc;
use tracing::instrument;

pub mod checkpoint;
pub mod config;
pub mod element;
pub mod errors;
pub mod extract;
pub mod locator;
pub mod model;
pub mod navigator;
pub mod orchestrator;
pub mod selector;
pub mod session;
pub mod sheets;

pub use checkpoint::{CheckpointEntry, CheckpointStatus, CheckpointStore, CheckpointSummary};
pub use config::HarvestConfig;
pub use element::Element;
pub use errors::HarvestError;
pub use extract::{Tab, TabPages};
pub use locator::{Locator, WaitPolicy};
pub use model::{ExtractionResult, InstrumentRecord, ResultStatus};
pub use navigator::{NavState, Navigator, SearchOutcome};
pub use orchestrator::{Orchestrator, RunSummary, ValidationReport};
pub use selector::Selector;
pub use session::{ElementRef, PortalSession};

/// The main entry point: a live portal page plus the wait policy used to
/// look things up on it.
#[derive(Clone)]
pub struct Portal {
    session: Arc<dyn PortalSession>,
    wait: WaitPolicy,
}

impl Portal {
    /// Attach to the browser named in `config`.
    #[instrument(skip(config), fields(endpoint = %config.devtools_endpoint))]
    pub async fn connect(config: &HarvestConfig) -> Result<Self, HarvestError> {
        let session = session::connect(
            &config.devtools_endpoint,
            config.page_url_pattern.as_deref(),
            config.command_timeout,
        )
        .await?;
        Ok(Self::with_session(session, config.wait_policy()))
    }

    /// Wrap a session supplied by the caller
    pub fn with_session(session: Arc<dyn PortalSession>, wait: WaitPolicy) -> Self {
        Self { session, wait }
    }

    pub fn session(&self) -> Arc<dyn PortalSession> {
        self.session.clone()
    }

    pub fn locator(&self, selector: impl Into<Selector>) -> Locator {
        Locator::new(self.session.clone(), selector.into(), self.wait)
    }

    pub async fn current_url(&self) -> Result<String, HarvestError> {
        self.session.current_url().await
    }
}
