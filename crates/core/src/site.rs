// crates/core/src/site.rs
//! Target-site description: where to sign in, where the item list lives, and
//! which markup identifies items, qualifying markers and the buttons to press.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::Selector;
use crate::pacing::TraversalConfig;

/// Env var holding the sign-in user name.
pub const USERNAME_ENV: &str = "AUTOFOLLOW_USERNAME";
/// Env var holding the sign-in password.
pub const PASSWORD_ENV: &str = "AUTOFOLLOW_PASSWORD";

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("failed to read site profile {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed site profile {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),
}

/// The one-time sign-in sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignIn {
    /// Element whose visibility means the form is ready.
    pub form_ready: Selector,
    pub username: Selector,
    pub password: Selector,
    pub submit: Selector,
    /// Pause between filling fields.
    #[serde(default = "default_field_delay_ms")]
    pub field_delay_ms: u64,
}

impl SignIn {
    pub fn field_delay(&self) -> Duration {
        Duration::from_millis(self.field_delay_ms)
    }
}

fn default_field_delay_ms() -> u64 {
    500
}

/// Decides whether an item qualifies for the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifier {
    /// Attribute read on the item's marker element.
    pub attribute: String,
    /// Exact value that qualifies.
    pub equals: String,
}

impl Qualifier {
    /// A missing attribute never qualifies.
    pub fn matches(&self, value: Option<&str>) -> bool {
        value == Some(self.equals.as_str())
    }
}

/// Markup of the paginated item list and of each item's linked page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub item: Selector,
    /// Element inside an item that carries the classification attribute.
    pub item_marker: Selector,
    /// Link inside an item whose `href` opens the item page.
    pub item_link: Selector,
    /// Button on the item page that performs the action.
    pub action: Selector,
    pub next_page: Selector,
    pub qualifier: Qualifier,
}

/// Everything site-specific the traversal needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub login_url: String,
    /// List page opened right after sign-in.
    pub start_url: String,
    pub sign_in: SignIn,
    pub listing: Listing,
    #[serde(default)]
    pub timings: TraversalConfig,
}

impl SiteProfile {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn load(path: &Path) -> Result<Self, SiteError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| SiteError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml_str(&raw).map_err(|source| SiteError::Parse {
            path: display,
            source,
        })
    }
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            login_url: "https://sp.pokepara.jp/kanto/login/login_gal.aspx?back_url=%2fgal_manage%2findex.aspx"
                .into(),
            start_url: "https://sp.pokepara.jp/gal_manage/favorite/gal.html?".into(),
            sign_in: SignIn {
                form_ready: Selector::css(r#"input[name="login_id"]"#),
                username: Selector::css(r#"input[name="login_id"]"#),
                password: Selector::css(r#"input[name="pass"]"#),
                submit: Selector::css(r#"input[type="submit"]"#),
                field_delay_ms: default_field_delay_ms(),
            },
            listing: Listing {
                item: Selector::css(".blog_box"),
                item_marker: Selector::css("span"),
                item_link: Selector::css("a"),
                action: Selector::css("a.bt_iine"),
                next_page: Selector::xpath("//a[contains(., '→')]"),
                qualifier: Qualifier {
                    attribute: "class".into(),
                    equals: "no_good".into(),
                },
            },
            timings: TraversalConfig::default(),
        }
    }
}

/// Sign-in credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read [`USERNAME_ENV`] and [`PASSWORD_ENV`].
    pub fn from_env() -> Result<Self, SiteError> {
        let username =
            std::env::var(USERNAME_ENV).map_err(|_| SiteError::MissingCredential(USERNAME_ENV))?;
        let password =
            std::env::var(PASSWORD_ENV).map_err(|_| SiteError::MissingCredential(PASSWORD_ENV))?;
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
