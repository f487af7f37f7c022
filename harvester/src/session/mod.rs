use crate::{HarvestError, Selector};
use std::sync::Arc;
use std::time::Duration;

pub mod cdp;

pub use cdp::{CdpEndpoint, CdpSession, TargetInfo};

/// Opaque handle to an element that lives inside the browser page.
///
/// Handles are only meaningful to the session that produced them and become
/// stale once the page navigates away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(pub u64);

/// Capability to drive an already-authenticated portal page.
///
/// The pipeline never creates or tears down the browser; it only consumes a
/// session handed to it at startup.
#[async_trait::async_trait]
pub trait PortalSession: Send + Sync {
    /// Snapshot of every element currently matching `selector`, searched
    /// inside `root` when given. Does not wait.
    async fn find_elements(
        &self,
        selector: &Selector,
        root: Option<ElementRef>,
    ) -> Result<Vec<ElementRef>, HarvestError>;

    async fn click(&self, element: ElementRef) -> Result<(), HarvestError>;

    /// Rendered text of the element, trimmed.
    async fn text(&self, element: ElementRef) -> Result<String, HarvestError>;

    /// Replace the value of an input control, firing the usual input/change events.
    async fn set_value(&self, element: ElementRef, value: &str) -> Result<(), HarvestError>;

    /// False when the control (or an ancestor) is marked disabled.
    async fn is_enabled(&self, element: ElementRef) -> Result<bool, HarvestError>;

    async fn attribute(
        &self,
        element: ElementRef,
        name: &str,
    ) -> Result<Option<String>, HarvestError>;

    async fn current_url(&self) -> Result<String, HarvestError>;
}

/// Attach to the browser's DevTools endpoint and return the page session.
pub async fn connect(
    endpoint: &str,
    url_pattern: Option<&str>,
    command_timeout: Duration,
) -> Result<Arc<dyn PortalSession>, HarvestError> {
    let endpoint = CdpEndpoint::new(endpoint);
    let session = CdpSession::attach(&endpoint, url_pattern, command_timeout).await?;
    Ok(Arc::new(session))
}
