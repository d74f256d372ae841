//! W3C WebDriver client over `reqwest`, aimed at a local chromedriver.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::browser::{Browser, BrowserError, BrowserLauncher, Locator};

/// Key under which WebDriver serializes element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub endpoint: String,
    pub headless: bool,
    pub window_size: (u32, u32),
    pub request_timeout: Duration,
    pub chrome_binary: Option<String>,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9515".to_string(),
            headless: true,
            window_size: (1920, 1080),
            request_timeout: Duration::from_secs(30),
            chrome_binary: None,
        }
    }
}

impl WebDriverConfig {
    pub fn capabilities(&self) -> JsonValue {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            format!("--window-size={},{}", self.window_size.0, self.window_size.1),
            "--start-maximized".to_string(),
        ];
        if self.headless {
            args.insert(0, "--headless".to_string());
        }
        let mut chrome_options = json!({ "args": args });
        if let Some(binary) = &self.chrome_binary {
            chrome_options["binary"] = json!(binary);
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": chrome_options,
                }
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    config: WebDriverConfig,
    client: reqwest::Client,
}

impl WebDriverLauncher {
    pub fn new(config: WebDriverConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("building webdriver http client")?;
        Ok(Self { config, client })
    }
}

#[derive(Debug, Deserialize)]
struct NewSessionValue {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    type Browser = WebDriverBrowser;

    async fn launch(&self) -> Result<WebDriverBrowser, BrowserError> {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        let value = send_command(
            &self.client,
            Method::POST,
            &format!("{endpoint}/session"),
            Some(self.config.capabilities()),
        )
        .await?;
        let session: NewSessionValue =
            serde_json::from_value(value).map_err(|e| BrowserError::Decode(e.to_string()))?;
        info!(session_id = %session.session_id, "webdriver session opened");

        Ok(WebDriverBrowser {
            client: self.client.clone(),
            session_url: format!("{endpoint}/session/{}", session.session_id),
            closed: false,
        })
    }
}

/// Opaque WebDriver element reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WebElement(String);

impl WebElement {
    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
pub struct WebDriverBrowser {
    client: reqwest::Client,
    session_url: String,
    closed: bool,
}

impl WebDriverBrowser {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<JsonValue>,
    ) -> Result<JsonValue, BrowserError> {
        if self.closed {
            return Err(BrowserError::Protocol {
                error: "invalid session id".to_string(),
                message: "session already quit".to_string(),
            });
        }
        send_command(&self.client, method, &format!("{}{path}", self.session_url), body).await
    }

    async fn element_command(
        &self,
        method: Method,
        element: &WebElement,
        action: &str,
        body: Option<JsonValue>,
    ) -> Result<JsonValue, BrowserError> {
        self.command(method, &format!("/element/{}/{action}", element.0), body)
            .await
    }
}

async fn send_command(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<JsonValue>,
) -> Result<JsonValue, BrowserError> {
    debug!(%method, url, "webdriver command");
    let request = client.request(method, url);
    // WebDriver requires a JSON body on every POST, even an empty one.
    let request = match body {
        Some(body) => request.json(&body),
        None => request,
    };
    let response = request.send().await?;
    let status = response.status();
    let mut payload: JsonValue = response.json().await?;
    let value = payload
        .get_mut("value")
        .map(JsonValue::take)
        .unwrap_or(JsonValue::Null);

    if status.is_success() {
        Ok(value)
    } else {
        Err(protocol_error(&value))
    }
}

fn protocol_error(value: &JsonValue) -> BrowserError {
    let error = value
        .get("error")
        .and_then(JsonValue::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    match error.as_str() {
        "no such element" => BrowserError::NoSuchElement(message),
        "stale element reference" => BrowserError::StaleElement,
        "element not interactable" | "element click intercepted" => {
            BrowserError::NotInteractable(message)
        }
        _ => BrowserError::Protocol { error, message },
    }
}

fn parse_elements(value: JsonValue) -> Result<Vec<WebElement>, BrowserError> {
    let JsonValue::Array(items) = value else {
        return Err(BrowserError::Decode(format!("expected element array, got {value}")));
    };
    items
        .into_iter()
        .map(|item| {
            item.get(ELEMENT_KEY)
                .and_then(JsonValue::as_str)
                .map(|id| WebElement(id.to_string()))
                .ok_or_else(|| BrowserError::Decode(format!("missing element reference in {item}")))
        })
        .collect()
}

fn expect_string(value: JsonValue) -> Result<String, BrowserError> {
    match value {
        JsonValue::String(s) => Ok(s),
        other => Err(BrowserError::Decode(format!("expected string, got {other}"))),
    }
}

fn expect_bool(value: JsonValue) -> Result<bool, BrowserError> {
    value
        .as_bool()
        .ok_or_else(|| BrowserError::Decode(format!("expected bool, got {value}")))
}

#[async_trait]
impl Browser for WebDriverBrowser {
    type Element = WebElement;

    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(drop)
    }

    async fn find_all(
        &mut self,
        scope: Option<&WebElement>,
        locator: &Locator,
    ) -> Result<Vec<WebElement>, BrowserError> {
        let (using, value) = locator.strategy();
        let body = json!({ "using": using, "value": value });
        let found = match scope {
            Some(element) => {
                self.element_command(Method::POST, element, "elements", Some(body))
                    .await?
            }
            None => self.command(Method::POST, "/elements", Some(body)).await?,
        };
        parse_elements(found)
    }

    async fn click(&mut self, element: &WebElement) -> Result<(), BrowserError> {
        self.element_command(Method::POST, element, "click", Some(json!({})))
            .await
            .map(drop)
    }

    async fn clear(&mut self, element: &WebElement) -> Result<(), BrowserError> {
        self.element_command(Method::POST, element, "clear", Some(json!({})))
            .await
            .map(drop)
    }

    async fn send_keys(&mut self, element: &WebElement, text: &str) -> Result<(), BrowserError> {
        self.element_command(Method::POST, element, "value", Some(json!({ "text": text })))
            .await
            .map(drop)
    }

    async fn text(&mut self, element: &WebElement) -> Result<String, BrowserError> {
        expect_string(self.element_command(Method::GET, element, "text", None).await?)
    }

    async fn is_displayed(&mut self, element: &WebElement) -> Result<bool, BrowserError> {
        expect_bool(
            self.element_command(Method::GET, element, "displayed", None)
                .await?,
        )
    }

    async fn is_enabled(&mut self, element: &WebElement) -> Result<bool, BrowserError> {
        expect_bool(self.element_command(Method::GET, element, "enabled", None).await?)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BrowserError> {
        let encoded = expect_string(self.command(Method::GET, "/screenshot", None).await?)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| BrowserError::Decode(format!("screenshot base64: {e}")))
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        expect_string(self.command(Method::GET, "/source", None).await?)
    }

    async fn quit(&mut self) -> Result<(), BrowserError> {
        if self.closed {
            return Ok(());
        }
        let result = self.command(Method::DELETE, "", None).await.map(drop);
        self.closed = true;
        info!(session_url = %self.session_url, "webdriver session closed");
        result
    }
}

impl Drop for WebDriverBrowser {
    fn drop(&mut self) {
        if !self.closed {
            warn!(session_url = %self.session_url, "webdriver session dropped without quit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_carry_headless_chrome_arguments() {
        let caps = WebDriverConfig::default().capabilities();
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .expect("args array");
        let args: Vec<&str> = args.iter().filter_map(JsonValue::as_str).collect();
        assert_eq!(args[0], "--headless");
        assert!(args.contains(&"--window-size=1920,1080"));
        assert!(args.contains(&"--no-sandbox"));
    }

    #[test]
    fn element_arrays_decode_to_references() {
        let value = json!([{ ELEMENT_KEY: "a1" }, { ELEMENT_KEY: "b2" }]);
        let elements = parse_elements(value).expect("elements");
        assert_eq!(
            elements,
            vec![WebElement("a1".into()), WebElement("b2".into())]
        );
        assert!(parse_elements(json!([{ "nope": 1 }])).is_err());
    }

    #[test]
    fn protocol_errors_map_to_typed_variants() {
        let err = protocol_error(&json!({ "error": "stale element reference", "message": "gone" }));
        assert!(matches!(err, BrowserError::StaleElement));
        let err = protocol_error(&json!({ "error": "no such element", "message": "h3" }));
        assert!(matches!(err, BrowserError::NoSuchElement(m) if m == "h3"));
        let err = protocol_error(&json!({ "error": "session not created", "message": "x" }));
        assert!(matches!(err, BrowserError::Protocol { .. }));
    }
}
