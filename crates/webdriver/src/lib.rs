// crates/webdriver/src/lib.rs
//! [`ActionDriver`](autofollow_core::ActionDriver) over the W3C WebDriver
//! HTTP protocol, for chromedriver and compatible remote ends.

pub mod protocol;
pub mod session;

pub use protocol::{chrome_capabilities, WebDriverError, ELEMENT_KEY};
pub use session::{WebDriverFactory, WebDriverSession};
