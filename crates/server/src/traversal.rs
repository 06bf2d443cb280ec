// crates/server/src/traversal.rs
//! The follow traversal: sign in, scan each list page, act on qualifying
//! items, paginate until the goal is met or the pages run out.
//!
//! Every driver call and every delay races the job's cancellation token, so
//! a `stop` is observed at the next suspension point. Secondary contexts are
//! closed on every path out of an item, and the driver session is shut down
//! on every path out of the job.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use autofollow_core::{
    ActionDriver, Credentials, DriverError, DriverFactory, ElementRef, ProgressMessage,
    SiteProfile, Target, TerminalReason,
};
use tokio_util::sync::CancellationToken;

use crate::hub::BroadcastHub;
use crate::jobs::{JobId, JobOutcome, SharedJobState};

/// Everything a running job shares with the rest of the process.
pub struct JobContext {
    pub job_id: JobId,
    pub target_count: u32,
    pub state: Arc<SharedJobState>,
    pub hub: Arc<BroadcastHub>,
    pub cancel: CancellationToken,
}

impl JobContext {
    /// Release the counters and tell subscribers how the job ended.
    ///
    /// Completed and exhausted jobs get one `terminal` message; stopped and
    /// failed jobs get one final `update`.
    fn finish(&self, outcome: &JobOutcome) {
        let snap = self.state.finish(self.job_id);
        let message = match outcome {
            JobOutcome::Completed => {
                ProgressMessage::terminal(TerminalReason::Completed, snap.current_count, snap.target_count)
            }
            JobOutcome::Exhausted => {
                ProgressMessage::terminal(TerminalReason::Exhausted, snap.current_count, snap.target_count)
            }
            JobOutcome::Stopped | JobOutcome::Failed(_) => {
                ProgressMessage::update(false, snap.current_count, snap.target_count)
            }
        };
        self.hub.broadcast(message);
        tracing::info!(
            job_id = self.job_id,
            outcome = outcome.label(),
            current_count = snap.current_count,
            target_count = snap.target_count,
            "follow job finished"
        );
    }
}

/// Run one job from connect to its terminal broadcast.
pub async fn run_job(
    ctx: JobContext,
    factory: Arc<dyn DriverFactory>,
    site: Arc<SiteProfile>,
    credentials: Arc<Credentials>,
) -> JobOutcome {
    tracing::info!(
        job_id = ctx.job_id,
        target_count = ctx.target_count,
        driver = factory.name(),
        "follow job started"
    );

    // Not raced against cancellation: a session created remotely must be
    // handed back so it can be shut down.
    let outcome = match factory.connect().await {
        Ok(mut driver) if ctx.cancel.is_cancelled() => {
            if let Err(e) = driver.shutdown().await {
                tracing::warn!(job_id = ctx.job_id, error = %e, "driver shutdown failed");
            }
            JobOutcome::Stopped
        }
        Ok(driver) => {
            let engine = TraversalEngine {
                ctx: &ctx,
                driver,
                site: &site,
                credentials: &credentials,
                page: 1,
            };
            engine.run().await
        }
        Err(e) if ctx.cancel.is_cancelled() => {
            tracing::debug!(job_id = ctx.job_id, error = %e, "connect failed after stop");
            JobOutcome::Stopped
        }
        Err(e) => {
            tracing::error!(job_id = ctx.job_id, error = %e, "could not open driver session");
            JobOutcome::Failed(e.to_string())
        }
    };

    ctx.finish(&outcome);
    outcome
}

/// Why a traversal step did not complete.
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    Driver(DriverError),
}

/// How processing of one list page ended.
enum PageEnd {
    GoalReached,
    LastPage,
    Advanced,
}

async fn step<T>(
    cancel: &CancellationToken,
    op: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        res = op => res.map_err(Interrupt::Driver),
    }
}

async fn pause(cancel: &CancellationToken, delay: Duration) -> Result<(), Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

struct TraversalEngine<'a> {
    ctx: &'a JobContext,
    driver: Box<dyn ActionDriver>,
    site: &'a SiteProfile,
    credentials: &'a Credentials,
    page: u32,
}

impl TraversalEngine<'_> {
    async fn run(mut self) -> JobOutcome {
        let outcome = match self.traverse().await {
            Ok(outcome) => outcome,
            Err(Interrupt::Cancelled) => JobOutcome::Stopped,
            Err(Interrupt::Driver(e)) => {
                tracing::error!(job_id = self.ctx.job_id, page = self.page, error = %e, "follow job failed");
                JobOutcome::Failed(e.to_string())
            }
        };

        if let Err(e) = self.driver.shutdown().await {
            tracing::warn!(job_id = self.ctx.job_id, error = %e, "driver shutdown failed");
        }
        outcome
    }

    async fn traverse(&mut self) -> Result<JobOutcome, Interrupt> {
        self.sign_in().await?;

        loop {
            match self.process_page().await {
                Ok(PageEnd::GoalReached) => return Ok(JobOutcome::Completed),
                Ok(PageEnd::LastPage) => return Ok(JobOutcome::Exhausted),
                Ok(PageEnd::Advanced) => self.page += 1,
                Err(Interrupt::Driver(e)) if e.is_recoverable() => {
                    tracing::warn!(
                        job_id = self.ctx.job_id,
                        page = self.page,
                        error = %e,
                        "page failed, checking for a next page"
                    );
                    if !self.has_next_page().await? {
                        return Ok(JobOutcome::Exhausted);
                    }
                    pause(&self.ctx.cancel, self.site.timings.page_retry_backoff).await?;
                    tracing::info!(job_id = self.ctx.job_id, page = self.page, "retrying page");
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn sign_in(&mut self) -> Result<(), Interrupt> {
        let (ctx, site) = (self.ctx, self.site);
        let form = &site.sign_in;
        let timings = &site.timings;
        tracing::info!(job_id = ctx.job_id, phase = "authenticating", "signing in");

        step(&ctx.cancel, self.driver.navigate(&site.login_url, timings.navigation_timeout)).await?;
        step(&ctx.cancel, self.driver.wait_for_visible(&form.form_ready, timings.sign_in_timeout)).await?;
        step(&ctx.cancel, self.driver.fill(&form.username, &self.credentials.username)).await?;
        pause(&ctx.cancel, form.field_delay()).await?;
        step(&ctx.cancel, self.driver.fill(&form.password, &self.credentials.password)).await?;
        pause(&ctx.cancel, form.field_delay()).await?;
        step(&ctx.cancel, self.driver.click(Target::Selector(&form.submit))).await?;
        step(&ctx.cancel, self.driver.navigate(&site.start_url, timings.navigation_timeout)).await?;
        Ok(())
    }

    async fn process_page(&mut self) -> Result<PageEnd, Interrupt> {
        let (ctx, site) = (self.ctx, self.site);
        let listing = &site.listing;
        tracing::info!(job_id = ctx.job_id, page = self.page, phase = "scanning", "scanning page");

        step(&ctx.cancel, self.driver.wait_for_visible(&listing.item, site.timings.list_timeout)).await?;
        let items = step(&ctx.cancel, self.driver.query_all(&listing.item)).await?;
        tracing::debug!(job_id = ctx.job_id, page = self.page, items = items.len(), "items found");

        for (index, item) in items.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            match self.visit_item(item).await {
                Ok(Some(count)) if count >= ctx.target_count => return Ok(PageEnd::GoalReached),
                Ok(_) => {}
                Err(Interrupt::Driver(e)) if e.is_recoverable() => {
                    tracing::warn!(
                        job_id = ctx.job_id,
                        page = self.page,
                        item = index,
                        error = %e,
                        "skipping item"
                    );
                }
                Err(other) => return Err(other),
            }
        }

        let snap = ctx.state.snapshot();
        if snap.current_count >= snap.target_count {
            return Ok(PageEnd::GoalReached);
        }

        tracing::debug!(job_id = ctx.job_id, page = self.page, phase = "paginating", "looking for next page");
        let next = step(&ctx.cancel, self.driver.query_all(&listing.next_page)).await?;
        let Some(link) = next.first() else {
            return Ok(PageEnd::LastPage);
        };
        step(&ctx.cancel, self.driver.click(Target::Element(link))).await?;
        pause(&ctx.cancel, site.timings.page_pacing.sample()).await?;
        Ok(PageEnd::Advanced)
    }

    async fn has_next_page(&mut self) -> Result<bool, Interrupt> {
        let next = step(&self.ctx.cancel, self.driver.query_all(&self.site.listing.next_page)).await?;
        Ok(!next.is_empty())
    }

    /// Act on `item` if it qualifies. Returns the new count after an action.
    async fn visit_item(&mut self, item: &ElementRef) -> Result<Option<u32>, Interrupt> {
        let (ctx, site) = (self.ctx, self.site);
        let listing = &site.listing;

        let Some(marker) = step(&ctx.cancel, self.driver.query_within(item, &listing.item_marker)).await? else {
            return Ok(None);
        };
        let value = step(
            &ctx.cancel,
            self.driver.read_attribute(&marker, &listing.qualifier.attribute),
        )
        .await?;
        if !listing.qualifier.matches(value.as_deref()) {
            return Ok(None);
        }

        let Some(link) = step(&ctx.cancel, self.driver.query_within(item, &listing.item_link)).await? else {
            tracing::warn!(job_id = ctx.job_id, page = self.page, "qualifying item has no link");
            return Ok(None);
        };
        let Some(href) = step(&ctx.cancel, self.driver.read_attribute(&link, "href")).await? else {
            tracing::warn!(job_id = ctx.job_id, page = self.page, "qualifying item link has no href");
            return Ok(None);
        };

        self.act_on(&href).await
    }

    /// Open `href` in a secondary context, press the action, pace, close the
    /// context, then count the action.
    async fn act_on(&mut self, href: &str) -> Result<Option<u32>, Interrupt> {
        let (ctx, site) = (self.ctx, self.site);
        let context = step(&ctx.cancel, self.driver.open_context()).await?;

        let acted = async {
            let timings = &site.timings;
            step(&ctx.cancel, self.driver.navigate(href, timings.navigation_timeout)).await?;
            step(&ctx.cancel, self.driver.wait_for_visible(&site.listing.action, timings.action_timeout)).await?;
            step(&ctx.cancel, self.driver.click(Target::Selector(&site.listing.action))).await?;
            pause(&ctx.cancel, timings.action_pacing.sample()).await
        }
        .await;

        // Runs on every path, cancellation included.
        let closed = self.driver.close_context(context).await;

        acted?;
        match closed {
            Err(e) if !e.is_recoverable() => return Err(Interrupt::Driver(e)),
            Err(e) => {
                tracing::warn!(job_id = ctx.job_id, error = %e, "failed to close item context");
            }
            Ok(()) => {}
        }

        let Some(count) = ctx.state.increment(ctx.job_id) else {
            // The counters were released under us; nothing left to report.
            return Err(Interrupt::Cancelled);
        };
        ctx.hub.broadcast(ProgressMessage::update(true, count, ctx.target_count));
        tracing::info!(
            job_id = ctx.job_id,
            page = self.page,
            current_count = count,
            target_count = ctx.target_count,
            href,
            "followed"
        );
        Ok(Some(count))
    }
}
