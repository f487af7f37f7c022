use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use super::{ElementRef, PortalSession};
use crate::{HarvestError, Selector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Marker thrown by the page-side prelude when a handle no longer points at a live node
const STALE_MARKER: &str = "harvest:stale";

const PRELUDE: &str = r#"
const refs = window.__harvestRefs || (window.__harvestRefs = new Map());
const ids = window.__harvestIds || (window.__harvestIds = new WeakMap());
const el = (i) => {
  const e = refs.get(i);
  if (!e || !e.isConnected) { throw new Error('harvest:stale ' + i); }
  return e;
};
const handle = (n) => {
  let i = ids.get(n);
  if (i === undefined || refs.get(i) !== n) {
    i = window.__harvestNext = (window.__harvestNext || 0) + 1;
    ids.set(n, i);
    refs.set(i, n);
  }
  return i;
};
"#;

const FIND_BODY: &str = r#"
if (ROOT === null) {
  // nodes the page has thrown away can only ever be stale
  for (const [i, n] of refs) { if (!n.isConnected) { refs.delete(i); } }
}
let current = ROOT === null ? [document] : [el(ROOT)];
for (const step of STEPS) {
  const next = [];
  for (const r of current) {
    if (step.kind === 'xpath') {
      const snap = document.evaluate(step.value, r, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      for (let i = 0; i < snap.snapshotLength; i++) { next.push(snap.snapshotItem(i)); }
    } else if (step.kind === 'css') {
      next.push(...r.querySelectorAll(step.value));
    } else if (step.kind === 'id') {
      const f = document.getElementById(step.value);
      if (f && (r === document || r.contains(f))) { next.push(f); }
    } else if (step.kind === 'text') {
      for (const e of r.querySelectorAll('*')) {
        const own = Array.from(e.childNodes)
          .filter((c) => c.nodeType === 3)
          .map((c) => c.textContent)
          .join('')
          .replace(/\s+/g, ' ')
          .trim();
        if (own === step.value) { next.push(e); }
      }
    }
  }
  current = next;
}
return current.filter((n) => n && n.nodeType === 1).map(handle);
"#;

/// One DevTools target as listed by `/json/list`
#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub websocket_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CdpRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CdpResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<Value>,
}

#[derive(Debug, Serialize)]
struct Step<'a> {
    kind: &'static str,
    value: &'a str,
}

/// HTTP side of the DevTools endpoint, used for target discovery
#[derive(Debug, Clone)]
pub struct CdpEndpoint {
    base_url: String,
    client: reqwest::Client,
}

impl CdpEndpoint {
    /// `endpoint` is `host:port` or a full `http://host:port` URL.
    pub fn new(endpoint: &str) -> Self {
        let endpoint = endpoint.trim().trim_end_matches('/');
        let base_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if a browser is running with DevTools enabled
    pub async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/json/version", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Get list of all debuggable targets
    pub async fn targets(&self) -> Result<Vec<TargetInfo>, HarvestError> {
        let response = self
            .client
            .get(format!("{}/json/list", self.base_url))
            .send()
            .await
            .map_err(|e| {
                HarvestError::SessionFailure(format!(
                    "Cannot reach DevTools at {}: {e}. {}",
                    self.base_url,
                    launch_instructions()
                ))
            })?;

        let targets: Vec<TargetInfo> = response.json().await.map_err(|e| {
            HarvestError::SessionFailure(format!("Failed to parse DevTools target list: {e}"))
        })?;

        debug!("Found {} DevTools targets", targets.len());
        Ok(targets)
    }

    /// First page target whose URL contains `url_pattern`, or the first page
    /// target when no pattern is given.
    pub async fn find_page(&self, url_pattern: Option<&str>) -> Result<TargetInfo, HarvestError> {
        let targets = self.targets().await?;
        pick_page(targets, url_pattern).ok_or_else(|| {
            HarvestError::SessionFailure(match url_pattern {
                Some(p) => format!("No open page with URL containing '{p}'"),
                None => "No open page in the attached browser".to_string(),
            })
        })
    }
}

fn pick_page(targets: Vec<TargetInfo>, url_pattern: Option<&str>) -> Option<TargetInfo> {
    targets
        .into_iter()
        .filter(|t| t.kind == "page" && t.websocket_url.is_some())
        .find(|t| url_pattern.map_or(true, |p| t.url.contains(p)))
}

/// Session bound to one page target over the DevTools WebSocket.
///
/// Element handles are indexes into a registry kept on the page's `window`,
/// so they are invalidated by navigation, which is what the pipeline expects.
pub struct CdpSession {
    target: TargetInfo,
    ws: Mutex<WsStream>,
    next_id: AtomicU64,
    command_timeout: Duration,
}

impl CdpSession {
    #[instrument(level = "debug", skip(endpoint))]
    pub async fn attach(
        endpoint: &CdpEndpoint,
        url_pattern: Option<&str>,
        command_timeout: Duration,
    ) -> Result<Self, HarvestError> {
        let target = endpoint.find_page(url_pattern).await?;
        let ws_url = target.websocket_url.clone().ok_or_else(|| {
            HarvestError::SessionFailure(format!(
                "Target {} exposes no WebSocket URL (is another debugger attached?)",
                target.id
            ))
        })?;

        let (ws, _response) = connect_async(ws_url.as_str()).await.map_err(|e| {
            HarvestError::SessionFailure(format!("WebSocket handshake with {ws_url} failed: {e}"))
        })?;

        info!(title = %target.title, url = %target.url, "Attached to browser page");
        Ok(Self {
            target,
            ws: Mutex::new(ws),
            next_id: AtomicU64::new(1),
            command_timeout,
        })
    }

    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    /// Send one protocol command and wait for its response, skipping events.
    async fn call(&self, method: &str, params: Value) -> Result<Value, HarvestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_string(&CdpRequest { id, method, params })
            .map_err(|e| HarvestError::Script(format!("cdp serialize: {e}")))?;

        let mut ws = self.ws.lock().await;
        ws.send(Message::Text(payload))
            .await
            .map_err(|e| HarvestError::SessionFailure(format!("DevTools send failed: {e}")))?;

        let read = async {
            while let Some(msg) = ws.next().await {
                let msg = msg.map_err(|e| {
                    HarvestError::SessionFailure(format!("DevTools connection error: {e}"))
                })?;
                let Message::Text(txt) = msg else {
                    continue;
                };
                let response: CdpResponse = match serde_json::from_str(&txt) {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("Ignoring unparseable DevTools message: {e}");
                        continue;
                    }
                };
                if response.id != Some(id) {
                    continue;
                }
                if let Some(error) = response.error {
                    return Err(HarvestError::Script(format!("{method}: {error}")));
                }
                return Ok(response.result.unwrap_or(Value::Null));
            }
            Err(HarvestError::SessionFailure(
                "DevTools connection closed".to_string(),
            ))
        };

        tokio::time::timeout(self.command_timeout, read)
            .await
            .map_err(|_| {
                HarvestError::SessionFailure(format!(
                    "No DevTools response to {method} within {:?}",
                    self.command_timeout
                ))
            })?
    }

    /// Evaluate `body` inside the handle prelude and return its value.
    async fn evaluate(&self, body: &str) -> Result<Value, HarvestError> {
        let expression = format!("(() => {{{PRELUDE}\n{body}\n}})()");
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("unknown exception")
                .to_string();
            if text.contains(STALE_MARKER) {
                return Err(HarvestError::StaleElement(text));
            }
            return Err(HarvestError::Script(text));
        }

        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

fn selector_step(selector: &Selector) -> Result<Step<'_>, HarvestError> {
    match selector {
        Selector::XPath(v) => Ok(Step { kind: "xpath", value: v }),
        Selector::Css(v) => Ok(Step { kind: "css", value: v }),
        Selector::Id(v) => Ok(Step { kind: "id", value: v }),
        Selector::Text(v) => Ok(Step { kind: "text", value: v }),
        Selector::Chain(_) => Err(HarvestError::InvalidSelector(
            "nested chains are not supported".into(),
        )),
        Selector::Invalid(reason) => Err(HarvestError::InvalidSelector(reason.clone())),
    }
}

fn selector_steps(selector: &Selector) -> Result<Vec<Step<'_>>, HarvestError> {
    match selector {
        Selector::Chain(parts) => parts.iter().map(selector_step).collect(),
        single => Ok(vec![selector_step(single)?]),
    }
}

fn js_string(value: &str) -> String {
    // serde_json string encoding is a valid JavaScript string literal
    Value::String(value.to_string()).to_string()
}

#[async_trait::async_trait]
impl PortalSession for CdpSession {
    async fn find_elements(
        &self,
        selector: &Selector,
        root: Option<ElementRef>,
    ) -> Result<Vec<ElementRef>, HarvestError> {
        let steps = serde_json::to_string(&selector_steps(selector)?)
            .map_err(|e| HarvestError::Script(format!("selector serialize: {e}")))?;
        let root = root.map_or_else(|| "null".to_string(), |r| r.0.to_string());
        let body = format!("const ROOT = {root};\nconst STEPS = {steps};\n{FIND_BODY}");

        let value = self.evaluate(&body).await?;
        let handles = value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_u64)
                    .map(ElementRef)
                    .collect()
            })
            .unwrap_or_default();
        Ok(handles)
    }

    #[instrument(level = "debug", skip(self))]
    async fn click(&self, element: ElementRef) -> Result<(), HarvestError> {
        let body = format!(
            "const e = el({});\ne.scrollIntoView({{block: 'center'}});\ne.click();\nreturn true;",
            element.0
        );
        self.evaluate(&body).await.map(|_| ())
    }

    async fn text(&self, element: ElementRef) -> Result<String, HarvestError> {
        let body = format!(
            "const e = el({});\nreturn (e.innerText ?? e.textContent ?? '').trim();",
            element.0
        );
        let value = self.evaluate(&body).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    #[instrument(level = "debug", skip(self))]
    async fn set_value(&self, element: ElementRef, value: &str) -> Result<(), HarvestError> {
        let body = format!(
            "const e = el({});\ne.focus();\ne.value = {};\n\
             e.dispatchEvent(new Event('input', {{bubbles: true}}));\n\
             e.dispatchEvent(new Event('change', {{bubbles: true}}));\nreturn true;",
            element.0,
            js_string(value)
        );
        self.evaluate(&body).await.map(|_| ())
    }

    async fn is_enabled(&self, element: ElementRef) -> Result<bool, HarvestError> {
        let body = format!(
            "const e = el({});\n\
             if (e.disabled) {{ return false; }}\n\
             if (e.getAttribute('aria-disabled') === 'true') {{ return false; }}\n\
             return e.closest('.disabled') === null;",
            element.0
        );
        let value = self.evaluate(&body).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn attribute(
        &self,
        element: ElementRef,
        name: &str,
    ) -> Result<Option<String>, HarvestError> {
        let body = format!(
            "return el({}).getAttribute({});",
            element.0,
            js_string(name)
        );
        let value = self.evaluate(&body).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn current_url(&self) -> Result<String, HarvestError> {
        let value = self.evaluate("return location.href;").await?;
        match value.as_str() {
            Some(url) => Ok(url.to_string()),
            None => {
                warn!("Page returned no location");
                Ok(String::new())
            }
        }
    }
}

/// How to start a browser the session can attach to
pub fn launch_instructions() -> &'static str {
    "Start Chrome or Edge with --remote-debugging-port=9222, log in to the portal in that window, then rerun."
}
