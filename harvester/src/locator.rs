use tracing::{debug, instrument, warn};

use crate::element::Element;
use crate::errors::HarvestError;
use crate::selector::Selector;
use crate::session::{ElementRef, PortalSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

// Default budget if none is specified on the locator itself
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long to wait for an element and how often to look for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Bounded polling for page elements.
///
/// Running out of time is not an error here: `wait` returns `Ok(None)` and
/// logs the selector, because many portal screens legitimately lack optional
/// content. Only a dead session escapes as an error.
#[derive(Clone)]
pub struct Locator {
    session: Arc<dyn PortalSession>,
    selector: Selector,
    wait: WaitPolicy,
    root: Option<ElementRef>,
}

impl Locator {
    pub(crate) fn new(session: Arc<dyn PortalSession>, selector: Selector, wait: WaitPolicy) -> Self {
        Self {
            session,
            selector,
            wait,
            root: None,
        }
    }

    /// Set a default timeout for waiting operations on this locator instance.
    pub fn set_default_timeout(mut self, timeout: Duration) -> Self {
        self.wait.timeout = timeout;
        self
    }

    /// Restrict the search to the subtree of `element`
    pub fn within(mut self, element: ElementRef) -> Self {
        self.root = Some(element);
        self
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    fn wrap(&self, handle: ElementRef) -> Element {
        Element::new(
            self.session.clone(),
            handle,
            self.wait,
            self.selector.to_string(),
        )
    }

    /// Current matches without waiting.
    pub async fn find_now(&self) -> Result<Vec<Element>, HarvestError> {
        if !self.selector.is_valid() {
            return Err(HarvestError::InvalidSelector(self.selector.to_string()));
        }
        let found = self.session.find_elements(&self.selector, self.root).await?;
        Ok(found.into_iter().map(|h| self.wrap(h)).collect())
    }

    /// Poll until at least one element matches, then return every match.
    /// Returns an empty list when the budget runs out.
    pub async fn all(&self, timeout: Option<Duration>) -> Result<Vec<Element>, HarvestError> {
        let effective_timeout = timeout.unwrap_or(self.wait.timeout);
        let deadline = Instant::now() + effective_timeout;

        loop {
            match self.find_now().await {
                Ok(found) if !found.is_empty() => return Ok(found),
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e @ HarvestError::InvalidSelector(_)) => return Err(e),
                // Page mid-navigation or a stale root; try again on the next tick
                Err(e) => debug!("Lookup of {} failed, retrying: {e}", self.selector),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Element {} not found within {:?}",
                    self.selector, effective_timeout
                );
                return Ok(Vec::new());
            }
            sleep(self.wait.poll_interval.min(deadline - now)).await;
        }
    }

    /// Wait for the first matching element. `Ok(None)` means it never appeared.
    #[instrument(level = "debug", skip(self, timeout), fields(selector = %self.selector))]
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<Option<Element>, HarvestError> {
        Ok(self.all(timeout).await?.into_iter().next())
    }

    /// Like `wait`, but absence is an `ElementTimeout` error.
    pub async fn wait_required(&self, timeout: Option<Duration>) -> Result<Element, HarvestError> {
        let effective_timeout = timeout.unwrap_or(self.wait.timeout);
        self.wait(Some(effective_timeout)).await?.ok_or_else(|| {
            HarvestError::ElementTimeout(format!(
                "Timed out after {effective_timeout:?} waiting for element {}",
                self.selector
            ))
        })
    }

    /// Get a nested locator
    pub fn locator(&self, selector: impl Into<Selector>) -> Locator {
        let mut chain = match self.selector.clone() {
            Selector::Chain(existing) => existing,
            s => vec![s],
        };
        match selector.into() {
            Selector::Chain(mut rest) => chain.append(&mut rest),
            s => chain.push(s),
        }
        Locator {
            session: self.session.clone(),
            selector: Selector::Chain(chain),
            wait: self.wait,
            root: self.root,
        }
    }
}
