// crates/core/src/testing.rs
//! In-memory [`ActionDriver`] that plays back scripted pages.
//!
//! Selectors are resolved by comparing them with the [`SiteProfile`] the
//! driver was built with, so any profile works as long as its selectors are
//! distinct. Every call that matters to an assertion is written to a shared
//! [`Journal`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::driver::{
    ActionDriver, ContextId, DriverError, DriverFactory, ElementRef, Selector, Target,
};
use crate::site::SiteProfile;

/// What happens when the item page is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemAction {
    /// The action affordance appears and the click succeeds.
    Succeeds,
    /// The affordance never appears.
    MissingAffordance,
    /// The click itself is rejected.
    ClickRejected,
    /// The session dies while waiting for the affordance.
    SessionLost,
    /// The wait never resolves; [`Journal::stalled`] is notified first.
    Stall,
}

#[derive(Debug, Clone)]
pub struct ScriptedItem {
    /// Value of the qualifier attribute on the item's marker; `None` means the
    /// item has no marker element.
    pub marker: Option<String>,
    pub href: String,
    pub action: ItemAction,
}

impl ScriptedItem {
    pub fn qualifying(href: impl Into<String>, marker: &str) -> Self {
        Self {
            marker: Some(marker.to_string()),
            href: href.into(),
            action: ItemAction::Succeeds,
        }
    }

    pub fn with_action(mut self, action: ItemAction) -> Self {
        self.action = action;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    pub items: Vec<ScriptedItem>,
    pub has_next: bool,
    /// Times the item list fails to become visible before it succeeds.
    pub list_failures: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub pages: Vec<ScriptedPage>,
    pub connect_error: Option<DriverError>,
    pub sign_in_error: Option<DriverError>,
    /// How long `connect` takes before it resolves.
    pub connect_delay: Duration,
}

/// Calls recorded by a [`ScriptedDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Navigate(String),
    Fill(String),
    SignedIn,
    OpenContext(ContextId),
    CloseContext(ContextId),
    /// The action was performed on the item with this href.
    Action(String),
    /// Moved to this (zero-based) page.
    NextPage(usize),
    Shutdown,
}

#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<DriverCall>>>,
    stalled: Arc<Notify>,
}

impl Journal {
    fn push(&self, call: DriverCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::Action(href) => Some(href),
                _ => None,
            })
            .collect()
    }

    pub fn opened_contexts(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::OpenContext(_)))
    }

    pub fn closed_contexts(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::CloseContext(_)))
    }

    pub fn shutdowns(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::Shutdown))
    }

    fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    /// Resolves once an item with [`ItemAction::Stall`] is reached.
    pub async fn stalled(&self) {
        self.stalled.notified().await;
    }
}

pub struct ScriptedDriver {
    script: Arc<Script>,
    profile: Arc<SiteProfile>,
    journal: Journal,
    page: usize,
    list_failures_left: Vec<u32>,
    next_context: u32,
    open: Option<(ContextId, Option<usize>)>,
    closed: bool,
}

impl ScriptedDriver {
    pub fn new(script: Arc<Script>, profile: Arc<SiteProfile>, journal: Journal) -> Self {
        let list_failures_left = script.pages.iter().map(|p| p.list_failures).collect();
        Self {
            script,
            profile,
            journal,
            page: 0,
            list_failures_left,
            next_context: 0,
            open: None,
            closed: false,
        }
    }

    fn ensure_alive(&self, operation: &str) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Session(format!("{operation} after shutdown")));
        }
        Ok(())
    }

    fn current_page(&self) -> Option<&ScriptedPage> {
        self.script.pages.get(self.page)
    }

    /// Item opened in the current secondary context.
    fn open_item(&self) -> Option<&ScriptedItem> {
        let (_, index) = self.open.as_ref()?;
        self.current_page()?.items.get((*index)?)
    }

    fn item_index(element: &ElementRef) -> Option<usize> {
        element.0.strip_prefix("item:")?.parse().ok()
    }
}

#[async_trait]
impl ActionDriver for ScriptedDriver {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.ensure_alive("navigate")?;
        self.journal.push(DriverCall::Navigate(url.to_string()));
        if let Some((id, _)) = self.open.take() {
            let index = self
                .current_page()
                .and_then(|p| p.items.iter().position(|item| item.href == url));
            self.open = Some((id, index));
        } else if url == self.profile.start_url {
            self.page = 0;
        }
        Ok(())
    }

    async fn fill(&mut self, selector: &Selector, _text: &str) -> Result<(), DriverError> {
        self.ensure_alive("fill")?;
        self.journal.push(DriverCall::Fill(selector.to_string()));
        Ok(())
    }

    async fn wait_for_visible(
        &mut self,
        selector: &Selector,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        self.ensure_alive("wait_for_visible")?;
        let listing = &self.profile.listing;

        if *selector == self.profile.sign_in.form_ready && self.open.is_none() {
            return match &self.script.sign_in_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            };
        }

        if *selector == listing.item {
            let page = self.page;
            if let Some(left) = self.list_failures_left.get_mut(page) {
                if *left > 0 {
                    *left -= 1;
                    return Err(DriverError::timeout("wait_for_visible(item list)", timeout));
                }
            }
            return match self.current_page() {
                Some(p) if !p.items.is_empty() => Ok(()),
                _ => Err(DriverError::timeout("wait_for_visible(item list)", timeout)),
            };
        }

        if *selector == listing.action {
            let action = self.open_item().map(|item| item.action.clone());
            return match action {
                Some(ItemAction::Succeeds) | Some(ItemAction::ClickRejected) => Ok(()),
                Some(ItemAction::MissingAffordance) | None => {
                    Err(DriverError::timeout("wait_for_visible(action)", timeout))
                }
                Some(ItemAction::SessionLost) => {
                    Err(DriverError::Session("browser crashed".into()))
                }
                Some(ItemAction::Stall) => {
                    self.journal.stalled.notify_one();
                    std::future::pending::<()>().await;
                    Ok(())
                }
            };
        }

        Err(DriverError::timeout(format!("wait_for_visible({selector})"), timeout))
    }

    async fn query_all(&mut self, selector: &Selector) -> Result<Vec<ElementRef>, DriverError> {
        self.ensure_alive("query_all")?;
        let listing = &self.profile.listing;
        let Some(page) = self.current_page() else {
            return Ok(Vec::new());
        };
        if *selector == listing.item {
            return Ok((0..page.items.len())
                .map(|i| ElementRef(format!("item:{i}")))
                .collect());
        }
        if *selector == listing.next_page {
            return Ok(if page.has_next {
                vec![ElementRef(format!("next:{}", self.page))]
            } else {
                Vec::new()
            });
        }
        Ok(Vec::new())
    }

    async fn query_within(
        &mut self,
        parent: &ElementRef,
        selector: &Selector,
    ) -> Result<Option<ElementRef>, DriverError> {
        self.ensure_alive("query_within")?;
        let Some(index) = Self::item_index(parent) else {
            return Err(DriverError::interaction("query_within", "stale element reference"));
        };
        let Some(item) = self.current_page().and_then(|p| p.items.get(index)) else {
            return Err(DriverError::interaction("query_within", "stale element reference"));
        };
        let listing = &self.profile.listing;
        if *selector == listing.item_marker {
            return Ok(item.marker.as_ref().map(|_| ElementRef(format!("marker:{index}"))));
        }
        if *selector == listing.item_link {
            return Ok(Some(ElementRef(format!("link:{index}"))));
        }
        Ok(None)
    }

    async fn read_attribute(
        &mut self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        self.ensure_alive("read_attribute")?;
        let items = self.current_page().map(|p| p.items.as_slice()).unwrap_or(&[]);
        if let Some(index) = element.0.strip_prefix("marker:") {
            let item = index.parse::<usize>().ok().and_then(|i| items.get(i));
            if name == self.profile.listing.qualifier.attribute {
                return Ok(item.and_then(|item| item.marker.clone()));
            }
            return Ok(None);
        }
        if let Some(index) = element.0.strip_prefix("link:") {
            let item = index.parse::<usize>().ok().and_then(|i| items.get(i));
            if name == "href" {
                return Ok(item.map(|item| item.href.clone()));
            }
            return Ok(None);
        }
        Err(DriverError::interaction("read_attribute", "stale element reference"))
    }

    async fn click(&mut self, target: Target<'_>) -> Result<(), DriverError> {
        self.ensure_alive("click")?;
        let profile = Arc::clone(&self.profile);
        let listing = &profile.listing;
        match target {
            Target::Selector(selector) if *selector == profile.sign_in.submit => {
                self.journal.push(DriverCall::SignedIn);
                Ok(())
            }
            Target::Selector(selector) if *selector == listing.action => {
                let Some(item) = self.open_item().cloned() else {
                    return Err(DriverError::interaction("click(action)", "no such element"));
                };
                if item.action == ItemAction::ClickRejected {
                    return Err(DriverError::interaction(
                        "click(action)",
                        "element click intercepted",
                    ));
                }
                self.journal.push(DriverCall::Action(item.href));
                Ok(())
            }
            Target::Selector(selector) if *selector == listing.next_page => self.advance(),
            Target::Element(element) if element.0.starts_with("next:") => self.advance(),
            _ => Err(DriverError::interaction("click", "no such element")),
        }
    }

    async fn open_context(&mut self) -> Result<ContextId, DriverError> {
        self.ensure_alive("open_context")?;
        if self.open.is_some() {
            return Err(DriverError::interaction(
                "open_context",
                "secondary context already open",
            ));
        }
        self.next_context += 1;
        let id = ContextId(format!("ctx-{}", self.next_context));
        self.open = Some((id.clone(), None));
        self.journal.push(DriverCall::OpenContext(id.clone()));
        Ok(id)
    }

    async fn close_context(&mut self, context: ContextId) -> Result<(), DriverError> {
        self.ensure_alive("close_context")?;
        match self.open.take() {
            Some((id, _)) if id == context => {
                self.journal.push(DriverCall::CloseContext(context));
                Ok(())
            }
            other => {
                self.open = other;
                Err(DriverError::interaction("close_context", "no such window"))
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), DriverError> {
        if !self.closed {
            self.closed = true;
            self.open = None;
            self.journal.push(DriverCall::Shutdown);
        }
        Ok(())
    }
}

impl ScriptedDriver {
    fn advance(&mut self) -> Result<(), DriverError> {
        let has_next = self.current_page().map(|p| p.has_next).unwrap_or(false);
        if !has_next {
            return Err(DriverError::interaction("click(next page)", "no such element"));
        }
        self.page += 1;
        self.journal.push(DriverCall::NextPage(self.page));
        Ok(())
    }
}

/// Hands out [`ScriptedDriver`]s that all write to the same [`Journal`].
#[derive(Clone)]
pub struct ScriptedDriverFactory {
    script: Arc<Script>,
    profile: Arc<SiteProfile>,
    journal: Journal,
}

impl ScriptedDriverFactory {
    pub fn new(script: Script, profile: SiteProfile) -> Self {
        Self {
            script: Arc::new(script),
            profile: Arc::new(profile),
            journal: Journal::default(),
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

#[async_trait]
impl DriverFactory for ScriptedDriverFactory {
    async fn connect(&self) -> Result<Box<dyn ActionDriver>, DriverError> {
        if !self.script.connect_delay.is_zero() {
            tokio::time::sleep(self.script.connect_delay).await;
        }
        if let Some(err) = &self.script.connect_error {
            return Err(err.clone());
        }
        Ok(Box::new(ScriptedDriver::new(
            Arc::clone(&self.script),
            Arc::clone(&self.profile),
            self.journal.clone(),
        )))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
