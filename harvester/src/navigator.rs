//! Drives the portal from its search screen to one instrument's tabs.
//!
//! The navigator owns the page-level protocol (menu, search, result link, tab
//! controls, pagination) and hands raw rows to the extractors. Every step that
//! cannot reach its target within its budget becomes a `NavigationFailure`
//! for the current instrument; only session failures escape unchanged.

use crate::config::{HarvestConfig, PortalLayout, TabLayout};
use crate::element::Element;
use crate::extract::{Row, Tab, TabPages};
use crate::locator::{Locator, WaitPolicy};
use crate::selector::Selector;
use crate::session::PortalSession;
use crate::HarvestError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Start,
    Searching,
    Found,
    TabSelecting(Tab),
    Extracted,
    NotFound,
    Skipped,
}

impl fmt::Display for NavState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavState::Start => f.write_str("Start"),
            NavState::Searching => f.write_str("Searching"),
            NavState::Found => f.write_str("Found"),
            NavState::TabSelecting(tab) => write!(f, "TabSelecting({tab})"),
            NavState::Extracted => f.write_str("Extracted"),
            NavState::NotFound => f.write_str("NotFound"),
            NavState::Skipped => f.write_str("Skipped"),
        }
    }
}

/// Result of searching for one instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found,
    NotFound,
}

pub struct Navigator {
    session: Arc<dyn PortalSession>,
    layout: PortalLayout,
    wait: WaitPolicy,
    search_timeout: Duration,
    max_pages: usize,
    history: Vec<NavState>,
}

impl Navigator {
    pub fn new(session: Arc<dyn PortalSession>, config: &HarvestConfig) -> Self {
        Self {
            session,
            layout: config.layout.clone(),
            wait: config.wait_policy(),
            search_timeout: config.search_timeout,
            max_pages: config.max_pages,
            history: vec![NavState::Start],
        }
    }

    pub fn state(&self) -> NavState {
        self.history.last().copied().unwrap_or(NavState::Start)
    }

    /// Every state visited for the current instrument, starting with `Start`
    pub fn history(&self) -> &[NavState] {
        &self.history
    }

    fn transition(&mut self, next: NavState) {
        debug!(from = %self.state(), to = %next, "Navigator transition");
        self.history.push(next);
    }

    fn locator(&self, selector: &Selector) -> Locator {
        Locator::new(self.session.clone(), selector.clone(), self.wait)
    }

    async fn required(&self, selector: &Selector, what: &str) -> Result<Element, HarvestError> {
        match self.locator(selector).wait_required(None).await {
            Ok(el) => Ok(el),
            Err(HarvestError::ElementTimeout(msg)) => {
                Err(HarvestError::NavigationFailure(format!("{what}: {msg}")))
            }
            Err(e) => Err(e),
        }
    }

    /// Search for `identifier` and follow the first hit.
    ///
    /// `Ok(NotFound)` is a normal outcome. Anything else that goes wrong on the
    /// way is a `NavigationFailure` (or a fatal session error).
    #[instrument(level = "debug", skip(self))]
    pub async fn open(&mut self, identifier: &str) -> Result<SearchOutcome, HarvestError> {
        self.history.clear();
        self.history.push(NavState::Start);
        self.transition(NavState::Searching);

        self.search(identifier).await.map_err(|e| match e {
            e if e.is_fatal() => e,
            e @ HarvestError::NavigationFailure(_) => e,
            other => HarvestError::NavigationFailure(format!("search for {identifier}: {other}")),
        })?;

        let hit = self
            .locator(&self.layout.result_link)
            .wait(Some(self.search_timeout))
            .await?;
        let Some(link) = hit else {
            self.transition(NavState::NotFound);
            self.transition(NavState::Skipped);
            info!(identifier, "Instrument not found in the portal");
            return Ok(SearchOutcome::NotFound);
        };

        link.click().await.map_err(|e| match e {
            e if e.is_fatal() => e,
            other => HarvestError::NavigationFailure(format!("open result for {identifier}: {other}")),
        })?;
        self.transition(NavState::Found);
        Ok(SearchOutcome::Found)
    }

    async fn search(&self, identifier: &str) -> Result<(), HarvestError> {
        for (step, selector) in self.layout.menu_path.iter().enumerate() {
            self.required(selector, &format!("menu step {}", step + 1))
                .await?
                .click()
                .await?;
        }
        self.required(&self.layout.search_input, "search field")
            .await?
            .fill(identifier)
            .await?;
        self.required(&self.layout.search_submit, "search button")
            .await?
            .click()
            .await
    }

    /// Open `tab` and read its rows across every page.
    ///
    /// `Ok(None)` means the tab opened but its content never rendered, which
    /// the portal does for empty tabs. A missing tab control is an
    /// `ElementTimeout`, a tab-level failure the caller decides about.
    #[instrument(level = "debug", skip(self), fields(tab = %tab))]
    pub async fn read_tab(&mut self, tab: Tab) -> Result<Option<TabPages>, HarvestError> {
        self.transition(NavState::TabSelecting(tab));
        let layout = self.layout.tab(tab).clone();

        let control = self
            .locator(&layout.control)
            .wait_required(None)
            .await
            .map_err(|e| match e {
                HarvestError::ElementTimeout(_) => {
                    HarvestError::ElementTimeout(format!("{tab} tab control missing"))
                }
                other => other,
            })?;
        control.click().await?;

        if self.locator(&layout.content).wait(None).await?.is_none() {
            debug!("{tab} shows no data");
            return Ok(None);
        }

        let mut pages = vec![self.read_rows(&layout).await?];
        while let Some(next) = self.next_page_control(&layout).await? {
            if pages.len() >= self.max_pages {
                warn!("{tab}: stopping after {} pages", self.max_pages);
                break;
            }
            let previous = pages.last().cloned().unwrap_or_default();
            next.click().await?;
            match self.wait_for_new_page(&layout, &previous).await? {
                Some(rows) => pages.push(rows),
                None => {
                    warn!("{tab}: page {} did not change after 'next', stopping", pages.len() + 1);
                    break;
                }
            }
        }
        debug!(pages = pages.len(), "{tab} read");
        Ok(Some(TabPages::new(pages)))
    }

    /// All instrument tabs have been visited
    pub fn finish(&mut self) {
        self.transition(NavState::Extracted);
    }

    async fn read_rows(&self, layout: &TabLayout) -> Result<Vec<Row>, HarvestError> {
        let content = self.locator(&layout.content).find_now().await?;
        let Some(content) = content.into_iter().next() else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::new();
        for row in content.locator(layout.rows.clone()).find_now().await? {
            rows.push(row.cells().await?);
        }
        Ok(rows)
    }

    async fn next_page_control(&self, layout: &TabLayout) -> Result<Option<Element>, HarvestError> {
        let Some(selector) = &layout.next_page else {
            return Ok(None);
        };
        let Some(next) = self.locator(selector).find_now().await?.into_iter().next() else {
            return Ok(None);
        };
        if !next.is_enabled().await? {
            return Ok(None);
        }
        let class = next.attribute("class").await?.unwrap_or_default();
        if class.split_whitespace().any(|c| c == "disabled") {
            return Ok(None);
        }
        Ok(Some(next))
    }

    /// Poll until the rows differ from `previous`. `None` when they never do.
    async fn wait_for_new_page(
        &self,
        layout: &TabLayout,
        previous: &[Row],
    ) -> Result<Option<Vec<Row>>, HarvestError> {
        let deadline = Instant::now() + self.wait.timeout;
        loop {
            match self.read_rows(layout).await {
                Ok(rows) if !rows.is_empty() && rows != previous => return Ok(Some(rows)),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                // the table is being swapped out under us
                Err(e) => debug!("Re-reading page: {e}"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.wait.poll_interval.min(deadline - now)).await;
        }
    }
}
