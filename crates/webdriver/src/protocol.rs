// crates/webdriver/src/protocol.rs
//! W3C WebDriver wire types and the mapping of protocol errors onto
//! [`DriverError`].

use std::time::Duration;

use autofollow_core::{DriverError, Selector};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Key under which the protocol returns element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f97ffe6d7e3";

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote end returned {status} {error}: {message}")]
    Protocol {
        status: u16,
        error: String,
        message: String,
    },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl WebDriverError {
    /// Classify for the traversal. `after` is the time budget the failed
    /// command had.
    pub fn into_driver_error(self, operation: &str, after: Duration) -> DriverError {
        match self {
            Self::Transport(e) if e.is_timeout() => DriverError::timeout(operation, after),
            Self::Transport(e) => DriverError::Session(format!("{operation}: {e}")),
            Self::Malformed(msg) => DriverError::Session(format!("{operation}: {msg}")),
            Self::Protocol { error, message, .. } => match error.as_str() {
                "timeout" | "script timeout" => DriverError::timeout(operation, after),
                "no such element"
                | "stale element reference"
                | "element not interactable"
                | "element click intercepted"
                | "invalid element state"
                | "move target out of bounds"
                | "no such window"
                | "unexpected alert open"
                | "invalid argument"
                | "javascript error" => DriverError::interaction(operation, format!("{error}: {message}")),
                _ => DriverError::Session(format!("{operation}: {error}: {message}")),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub value: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewSession {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ElementBody {
    #[serde(rename = "element-6066-11e4-a52e-4f97ffe6d7e3")]
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewWindow {
    pub handle: String,
}

/// Body of the locator commands.
pub(crate) fn locator(selector: &Selector) -> Value {
    let using = match selector {
        Selector::Css(_) => "css selector",
        Selector::XPath(_) => "xpath",
    };
    json!({ "using": using, "value": selector.expression() })
}

/// Capabilities for a Chrome session sized like a phone screen.
pub fn chrome_capabilities(headless: bool) -> Value {
    let mut args = vec!["--window-size=520,844", "--disable-gpu"];
    if headless {
        args.push("--headless=new");
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": { "args": args }
            }
        }
    })
}

/// Decode `{"value": ...}`, or the error object on a non-2xx status.
pub(crate) async fn decode<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, WebDriverError> {
    let status = resp.status();
    let bytes = resp.bytes().await?;

    if !status.is_success() {
        return match serde_json::from_slice::<Envelope<ErrorBody>>(&bytes) {
            Ok(Envelope { value }) => Err(WebDriverError::Protocol {
                status: status.as_u16(),
                error: value.error,
                message: value.message,
            }),
            Err(_) => Err(WebDriverError::Malformed(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&bytes)
            ))),
        };
    }

    serde_json::from_slice::<Envelope<T>>(&bytes)
        .map(|e| e.value)
        .map_err(|e| WebDriverError::Malformed(e.to_string()))
}
