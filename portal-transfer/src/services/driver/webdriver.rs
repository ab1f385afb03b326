//! Minimal W3C WebDriver client
//!
//! Speaks the WebDriver wire protocol (JSON over HTTP) to chromedriver,
//! geckodriver or a Selenium grid. Only the commands the portal driver
//! needs are implemented.

use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;

use super::DriverError;
use crate::config::{Locator, WebDriverConfig};

/// Key under which W3C responses carry an element reference
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4a4e4b6f5e0b";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra time on top of the remote timeouts before an HTTP request is abandoned
const REQUEST_MARGIN: Duration = Duration::from_secs(15);

/// Connection to a WebDriver server
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    base_url: String,
}

impl WebDriverClient {
    pub fn new(base_url: &str) -> Result<Self, DriverError> {
        // WebDriver servers run next to the service, never behind a proxy
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| DriverError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Start a new browser session
    ///
    /// `request_timeout` bounds every later command on the session.
    pub async fn new_session(
        &self,
        capabilities: Value,
        request_timeout: Duration,
    ) -> Result<WebDriverSession, DriverError> {
        let url = format!("{}/session", self.base_url);
        let value = send(
            &self.http,
            Method::POST,
            &url,
            Some(json!({ "capabilities": capabilities })),
            request_timeout,
        )
        .await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Protocol {
                error: "invalid response".to_string(),
                message: "New session response has no sessionId".to_string(),
            })?
            .to_string();

        tracing::debug!(session_id = %session_id, "WebDriver session created");

        Ok(WebDriverSession {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            session_id,
            request_timeout,
        })
    }
}

/// Reference to an element on the remote page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(String);

impl ElementRef {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// One live browser session
#[derive(Debug)]
pub struct WebDriverSession {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
    request_timeout: Duration,
}

impl WebDriverSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        send(&self.http, method, &url, body, self.request_timeout).await
    }

    /// Set the implicit element wait and the page load timeout
    pub async fn set_timeouts(&self, implicit: Duration, page_load: Duration) -> Result<(), DriverError> {
        self.command(
            Method::POST,
            "/timeouts",
            Some(json!({
                "implicit": implicit.as_millis() as u64,
                "pageLoad": page_load.as_millis() as u64,
            })),
        )
        .await?;
        Ok(())
    }

    /// Change only the implicit element wait
    pub async fn set_implicit_wait(&self, implicit: Duration) -> Result<(), DriverError> {
        self.command(
            Method::POST,
            "/timeouts",
            Some(json!({ "implicit": implicit.as_millis() as u64 })),
        )
        .await?;
        Ok(())
    }

    pub async fn set_window_size(&self, width: u32, height: u32) -> Result<(), DriverError> {
        self.command(
            Method::POST,
            "/window/rect",
            Some(json!({ "width": width, "height": height })),
        )
        .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, DriverError> {
        let value = self.command(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Find one element on the page
    pub async fn find_element(&self, locator: &Locator) -> Result<ElementRef, DriverError> {
        let value = self
            .command(Method::POST, "/element", Some(locator_body(locator)))
            .await
            .map_err(|e| with_locator(e, locator))?;
        element_ref(&value)
    }

    /// Find every element matching `locator`; empty when none match
    pub async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementRef>, DriverError> {
        let value = self
            .command(Method::POST, "/elements", Some(locator_body(locator)))
            .await?;
        match value.as_array() {
            Some(items) => items.iter().map(element_ref).collect(),
            None => Err(DriverError::Protocol {
                error: "invalid response".to_string(),
                message: format!("Expected an element list, got {}", value),
            }),
        }
    }

    /// Find one element below `parent`
    pub async fn find_child(
        &self,
        parent: &ElementRef,
        locator: &Locator,
    ) -> Result<ElementRef, DriverError> {
        let path = format!("/element/{}/element", parent.id());
        let value = self
            .command(Method::POST, &path, Some(locator_body(locator)))
            .await
            .map_err(|e| with_locator(e, locator))?;
        element_ref(&value)
    }

    pub async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        let path = format!("/element/{}/click", element.id());
        self.command(Method::POST, &path, Some(json!({}))).await?;
        Ok(())
    }

    pub async fn clear(&self, element: &ElementRef) -> Result<(), DriverError> {
        let path = format!("/element/{}/clear", element.id());
        self.command(Method::POST, &path, Some(json!({}))).await?;
        Ok(())
    }

    /// Type text into an element
    pub async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        let path = format!("/element/{}/value", element.id());
        self.command(Method::POST, &path, Some(json!({ "text": text })))
            .await?;
        Ok(())
    }

    /// Visible text of an element
    pub async fn text(&self, element: &ElementRef) -> Result<String, DriverError> {
        let path = format!("/element/{}/text", element.id());
        let value = self.command(Method::GET, &path, None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// End the session and close the browser
    pub async fn delete(&self) -> Result<(), DriverError> {
        self.command(Method::DELETE, "", None).await?;
        Ok(())
    }
}

async fn send(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
    timeout: Duration,
) -> Result<Value, DriverError> {
    let mut request = http.request(method, url).timeout(timeout + REQUEST_MARGIN);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| DriverError::Transport(e.to_string()))?;

    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| DriverError::Transport(format!("Invalid WebDriver response ({}): {}", status, e)))?;

    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Err(protocol_error(error, message))
}

/// Map a W3C error code to a driver error
pub(crate) fn protocol_error(error: &str, message: &str) -> DriverError {
    match error {
        "invalid session id" | "no such window" | "session not created" => {
            DriverError::SessionLost(format!("{}: {}", error, message))
        }
        "no such element" => DriverError::ElementNotFound {
            locator: message.to_string(),
        },
        _ => DriverError::Protocol {
            error: error.to_string(),
            message: message.to_string(),
        },
    }
}

fn with_locator(err: DriverError, locator: &Locator) -> DriverError {
    match err {
        DriverError::ElementNotFound { .. } => DriverError::ElementNotFound {
            locator: locator.to_string(),
        },
        other => other,
    }
}

fn locator_body(locator: &Locator) -> Value {
    json!({
        "using": locator.strategy.as_webdriver(),
        "value": locator.value,
    })
}

fn element_ref(value: &Value) -> Result<ElementRef, DriverError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| DriverError::Protocol {
            error: "invalid response".to_string(),
            message: format!("No element reference in {}", value),
        })
}

/// New-session capabilities for the configured browser
pub fn capabilities(config: &WebDriverConfig, user_agent: &str) -> Value {
    if config.browser == "firefox" {
        let args: Vec<&str> = if config.headless { vec!["-headless"] } else { Vec::new() };
        return json!({
            "alwaysMatch": {
                "browserName": "firefox",
                "moz:firefoxOptions": {
                    "args": args,
                    "prefs": { "general.useragent.override": user_agent },
                },
            }
        });
    }

    let mut args = vec![format!("--user-agent={}", user_agent)];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    json!({
        "alwaysMatch": {
            "browserName": config.browser,
            "goog:chromeOptions": { "args": args },
        }
    })
}

/// Quote a string as an XPath literal
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{}'", value)
    } else if !value.contains('"') {
        format!("\"{}\"", value)
    } else {
        let parts: Vec<String> = value
            .split('\'')
            .map(|part| format!("'{}'", part))
            .collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}
