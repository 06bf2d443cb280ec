// crates/webdriver/src/session.rs
//! A W3C WebDriver session driving one browser.

use std::time::Duration;

use async_trait::async_trait;
use autofollow_core::{
    ActionDriver, ContextId, DriverError, DriverFactory, ElementRef, Selector, Target,
};
use reqwest::Method;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::protocol::{self, ElementBody, NewSession, NewWindow, WebDriverError};

/// Budget for commands that have no timeout of their own.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Extra time given to the HTTP request on top of a page-load timeout.
const NAVIGATION_SLACK: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Opens one WebDriver session per job.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    client: reqwest::Client,
    endpoint: String,
    capabilities: Value,
    poll_interval: Duration,
}

impl WebDriverFactory {
    /// Chrome via the WebDriver server at `endpoint` (e.g. chromedriver).
    pub fn new(endpoint: &str, headless: bool) -> Result<Self, WebDriverError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_COMMAND_TIMEOUT * 4)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            capabilities: protocol::chrome_capabilities(headless),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Replace the new-session body.
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Open a session and remember its first window as the primary context.
    pub async fn open_session(&self) -> Result<WebDriverSession, DriverError> {
        let fail = |e: WebDriverError| e.into_driver_error("new session", DEFAULT_COMMAND_TIMEOUT);

        let resp = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&self.capabilities)
            .timeout(DEFAULT_COMMAND_TIMEOUT)
            .send()
            .await
            .map_err(|e| fail(e.into()))?;
        let created: NewSession = protocol::decode(resp).await.map_err(fail)?;

        let mut session = WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, created.session_id),
            session_id: created.session_id,
            primary: String::new(),
            current: None,
            page_load: None,
            poll_interval: self.poll_interval,
            closed: false,
        };
        match session.call("window handle", Method::GET, "/window", None).await {
            Ok(handle) => session.primary = handle,
            Err(e) => {
                // The remote end already holds a browser for this id.
                if let Err(cleanup) = session.shutdown().await {
                    tracing::warn!(
                        session_id = %session.session_id,
                        error = %cleanup,
                        "failed to delete half-opened session"
                    );
                }
                return Err(e);
            }
        }
        tracing::debug!(session_id = %session.session_id, "WebDriver session opened");
        Ok(session)
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn connect(&self) -> Result<Box<dyn ActionDriver>, DriverError> {
        Ok(Box::new(self.open_session().await?))
    }

    fn name(&self) -> &str {
        "webdriver"
    }
}

#[derive(Debug)]
pub struct WebDriverSession {
    client: reqwest::Client,
    /// `{endpoint}/session/{id}`
    base: String,
    session_id: String,
    /// Window handle of the primary context.
    primary: String,
    /// Open secondary window, if any.
    current: Option<String>,
    /// Last page-load timeout sent to the remote end.
    page_load: Option<Duration>,
    poll_interval: Duration,
    closed: bool,
}

impl WebDriverSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<T, WebDriverError> {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base, path))
            .timeout(timeout);
        if let Some(body) = body {
            req = req.json(&body);
        }
        protocol::decode(req.send().await?).await
    }

    /// Send a command with the default budget and classify any failure.
    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, DriverError> {
        self.call_within(operation, method, path, body, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    async fn call_within<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<T, DriverError> {
        if self.closed {
            return Err(DriverError::Session(format!("{operation} after shutdown")));
        }
        self.request(method, path, body, timeout)
            .await
            .map_err(|e| e.into_driver_error(operation, timeout))
    }

    async fn find_all(&self, selector: &Selector) -> Result<Vec<ElementRef>, DriverError> {
        let found: Vec<ElementBody> = self
            .call(
                "find elements",
                Method::POST,
                "/elements",
                Some(protocol::locator(selector)),
            )
            .await?;
        Ok(found.into_iter().map(|e| ElementRef(e.id)).collect())
    }

    async fn element_command(
        &self,
        operation: &str,
        element: &ElementRef,
        command: &str,
        body: Value,
    ) -> Result<(), DriverError> {
        let _: IgnoredAny = self
            .call(
                operation,
                Method::POST,
                &format!("/element/{}/{command}", element.0),
                Some(body),
            )
            .await?;
        Ok(())
    }

    async fn first_displayed(&self, selector: &Selector) -> Result<bool, DriverError> {
        for element in self.find_all(selector).await? {
            let displayed: Result<bool, DriverError> = self
                .call(
                    "is displayed",
                    Method::GET,
                    &format!("/element/{}/displayed", element.0),
                    None,
                )
                .await;
            match displayed {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                // The page moved under us; look again on the next poll.
                Err(DriverError::Interaction { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Close `handle`, which was never made current, and return to the
    /// primary window. `DELETE /window` acts on the current window, so the
    /// switch has to succeed first.
    async fn discard_window(&self, handle: &str) -> Result<(), DriverError> {
        self.switch_to(handle).await?;
        let closed: Result<IgnoredAny, DriverError> =
            self.call("close window", Method::DELETE, "/window", None).await;
        let switched = self.switch_to(&self.primary).await;
        closed?;
        switched
    }

    async fn switch_to(&self, handle: &str) -> Result<(), DriverError> {
        let _: IgnoredAny = self
            .call(
                "switch window",
                Method::POST,
                "/window",
                Some(json!({ "handle": handle })),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ActionDriver for WebDriverSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        if self.page_load != Some(timeout) {
            let _: IgnoredAny = self
                .call(
                    "set timeouts",
                    Method::POST,
                    "/timeouts",
                    Some(json!({ "pageLoad": timeout.as_millis() as u64 })),
                )
                .await?;
            self.page_load = Some(timeout);
        }

        let operation = format!("navigate({url})");
        let _: IgnoredAny = self
            .call_within(
                &operation,
                Method::POST,
                "/url",
                Some(json!({ "url": url })),
                timeout + NAVIGATION_SLACK,
            )
            .await
            .map_err(|e| match e {
                DriverError::Timeout { operation, .. } => DriverError::Timeout {
                    operation,
                    after: timeout,
                },
                other => other,
            })?;
        Ok(())
    }

    async fn fill(&mut self, selector: &Selector, text: &str) -> Result<(), DriverError> {
        let element: ElementBody = self
            .call(
                "find element",
                Method::POST,
                "/element",
                Some(protocol::locator(selector)),
            )
            .await?;
        let element = ElementRef(element.id);
        self.element_command("clear", &element, "clear", json!({})).await?;
        self.element_command("send keys", &element, "value", json!({ "text": text }))
            .await
    }

    async fn wait_for_visible(
        &mut self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.first_displayed(selector).await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DriverError::timeout(
                    format!("wait_for_visible({selector})"),
                    timeout,
                ));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn query_all(&mut self, selector: &Selector) -> Result<Vec<ElementRef>, DriverError> {
        self.find_all(selector).await
    }

    async fn query_within(
        &mut self,
        parent: &ElementRef,
        selector: &Selector,
    ) -> Result<Option<ElementRef>, DriverError> {
        let found: Result<ElementBody, DriverError> = self
            .call(
                "find child element",
                Method::POST,
                &format!("/element/{}/element", parent.0),
                Some(protocol::locator(selector)),
            )
            .await;
        match found {
            Ok(element) => Ok(Some(ElementRef(element.id))),
            Err(DriverError::Interaction { ref message, .. }) if message.starts_with("no such element") => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn read_attribute(
        &mut self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        // The href property is already resolved against the page URL.
        let kind = if name == "href" { "property" } else { "attribute" };
        let value: Value = self
            .call(
                "read attribute",
                Method::GET,
                &format!("/element/{}/{kind}/{name}", element.0),
                None,
            )
            .await?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    async fn click(&mut self, target: Target<'_>) -> Result<(), DriverError> {
        let element = match target {
            Target::Element(element) => element.clone(),
            Target::Selector(selector) => {
                let found: ElementBody = self
                    .call(
                        "find element",
                        Method::POST,
                        "/element",
                        Some(protocol::locator(selector)),
                    )
                    .await?;
                ElementRef(found.id)
            }
        };
        self.element_command("click", &element, "click", json!({})).await
    }

    async fn open_context(&mut self) -> Result<ContextId, DriverError> {
        if self.current.is_some() {
            return Err(DriverError::interaction(
                "open context",
                "a secondary context is already open",
            ));
        }
        let window: NewWindow = self
            .call(
                "new window",
                Method::POST,
                "/window/new",
                Some(json!({ "type": "tab" })),
            )
            .await?;
        if let Err(e) = self.switch_to(&window.handle).await {
            if let Err(cleanup) = self.discard_window(&window.handle).await {
                tracing::warn!(
                    session_id = %self.session_id,
                    handle = %window.handle,
                    error = %cleanup,
                    "failed to close orphaned window"
                );
            }
            return Err(e);
        }
        self.current = Some(window.handle.clone());
        Ok(ContextId(window.handle))
    }

    async fn close_context(&mut self, context: ContextId) -> Result<(), DriverError> {
        if self.current.as_deref() != Some(context.0.as_str()) {
            return Err(DriverError::interaction(
                "close context",
                format!("{} is not the open context", context.0),
            ));
        }
        let closed: Result<IgnoredAny, DriverError> =
            self.call("close window", Method::DELETE, "/window", None).await;
        self.current = None;
        // Return to the primary window even if closing failed.
        let switched = self.switch_to(&self.primary).await;
        closed?;
        switched
    }

    async fn shutdown(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        let result: Result<IgnoredAny, DriverError> =
            self.call("delete session", Method::DELETE, "", None).await;
        self.closed = true;
        self.current = None;
        tracing::debug!(session_id = %self.session_id, "WebDriver session closed");
        result.map(|_| ())
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(session_id = %self.session_id, "WebDriver session dropped without shutdown");
        }
    }
}
