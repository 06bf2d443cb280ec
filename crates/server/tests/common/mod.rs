//! Shared fixtures for the server integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use autofollow_core::testing::{ItemAction, Script, ScriptedDriverFactory, ScriptedItem, ScriptedPage};
use autofollow_core::{Credentials, JitterPolicy, SiteProfile, TraversalConfig};
use autofollow_server::AppState;

/// Default site with millisecond timings.
pub fn fast_site() -> SiteProfile {
    let tick = Duration::from_millis(1);
    let mut site = SiteProfile::default();
    site.sign_in.field_delay_ms = 0;
    site.timings = TraversalConfig {
        navigation_timeout: Duration::from_millis(50),
        sign_in_timeout: Duration::from_millis(50),
        list_timeout: Duration::from_millis(50),
        action_timeout: Duration::from_millis(50),
        action_pacing: JitterPolicy::fixed(tick),
        page_pacing: JitterPolicy::fixed(tick),
        page_retry_backoff: tick,
    };
    site
}

pub fn qualifying(href: &str) -> ScriptedItem {
    ScriptedItem::qualifying(href, "no_good")
}

/// One page whose second item never finishes loading.
pub fn stalling_script() -> Script {
    Script {
        pages: vec![ScriptedPage {
            items: vec![
                qualifying("/a"),
                qualifying("/b").with_action(ItemAction::Stall),
            ],
            has_next: true,
            list_failures: 0,
        }],
        ..Script::default()
    }
}

pub fn app_state(script: Script, keepalive: Duration) -> (Arc<AppState>, ScriptedDriverFactory) {
    let site = fast_site();
    let factory = ScriptedDriverFactory::new(script, site.clone());
    let state = AppState::new(
        Arc::new(factory.clone()),
        site,
        Credentials::new("user", "pass"),
        keepalive,
    );
    (state, factory)
}
