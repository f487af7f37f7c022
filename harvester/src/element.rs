use crate::errors::HarvestError;
use crate::locator::{Locator, WaitPolicy};
use crate::selector::Selector;
use crate::session::{ElementRef, PortalSession};
use std::fmt;
use std::sync::Arc;

/// A live element on the portal page
#[derive(Clone)]
pub struct Element {
    session: Arc<dyn PortalSession>,
    handle: ElementRef,
    wait: WaitPolicy,
    origin: String,
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("handle", &self.handle)
            .field("origin", &self.origin)
            .finish()
    }
}

impl Element {
    pub(crate) fn new(
        session: Arc<dyn PortalSession>,
        handle: ElementRef,
        wait: WaitPolicy,
        origin: String,
    ) -> Self {
        Self {
            session,
            handle,
            wait,
            origin,
        }
    }

    pub fn handle(&self) -> ElementRef {
        self.handle
    }

    /// The selector this element was found with
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub async fn click(&self) -> Result<(), HarvestError> {
        self.session.click(self.handle).await
    }

    pub async fn text(&self) -> Result<String, HarvestError> {
        self.session.text(self.handle).await
    }

    /// Clear the control and type `value` into it
    pub async fn fill(&self, value: &str) -> Result<(), HarvestError> {
        self.session.set_value(self.handle, "").await?;
        self.session.set_value(self.handle, value).await
    }

    pub async fn is_enabled(&self) -> Result<bool, HarvestError> {
        self.session.is_enabled(self.handle).await
    }

    pub async fn attribute(&self, name: &str) -> Result<Option<String>, HarvestError> {
        self.session.attribute(self.handle, name).await
    }

    /// Locator scoped to this element's subtree
    pub fn locator(&self, selector: impl Into<Selector>) -> Locator {
        Locator::new(self.session.clone(), selector.into(), self.wait).within(self.handle)
    }

    /// Text of every `td` cell in this row, in column order
    pub async fn cells(&self) -> Result<Vec<String>, HarvestError> {
        let cells = self.locator(Selector::Css("td".into())).find_now().await?;
        let mut texts = Vec::with_capacity(cells.len());
        for cell in cells {
            texts.push(cell.text().await?);
        }
        Ok(texts)
    }
}
