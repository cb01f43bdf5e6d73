//! Pagination synchronization state machine.
//!
//! Keeps a stateful paginated UI aligned with the page number the harvest
//! unit wants next. The UI's own page indicator is the source of truth;
//! the machine re-reads it after every action, so stale or surprising UI
//! state is corrected instead of trusted.
//!
//! All retries are explicit bounded loops carrying attempt counters; the
//! give-up bound is an ordinary, testable parameter.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::{Navigation, PageNumberParser};
use crate::driver::{DriverError, PageDriver};

static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static regex"));

/// Retry budgets and pacing for one synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Total failed actions tolerated per target page before giving up.
    pub give_up: u32,
    /// Unreadable indicator re-reads tolerated before a full reload.
    pub reread_limit: u32,
    /// Pause after each click, letting the UI re-render.
    pub click_delay_ms: u64,
    /// Bound on waiting for a navigation control to become clickable.
    pub wait_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            give_up: 10,
            reread_limit: 3,
            click_delay_ms: 500,
            wait_timeout_ms: 10_000,
        }
    }
}

/// Relation between the UI's declared page and the target page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Indicator unreadable; the UI's position is unknown.
    DesyncUnknown,
    Behind(u32),
    Ahead(u32),
    Synced,
}

impl PageState {
    fn classify(current: Option<u32>, target: u32) -> Self {
        match current {
            None => Self::DesyncUnknown,
            Some(c) if c < target => Self::Behind(c),
            Some(c) if c > target => Self::Ahead(c),
            Some(_) => Self::Synced,
        }
    }
}

/// Synchronization failures.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("gave up synchronizing to page {target} after {attempts} failed actions (last error: {last_error:?})")]
    GaveUp {
        target: u32,
        attempts: u32,
        last_error: Option<String>,
    },
}

/// Drives one session's UI toward a target page.
pub struct PageSynchronizer<'a> {
    driver: &'a mut dyn PageDriver,
    navigation: &'a Navigation,
    source_url: &'a str,
    parser: Option<&'a PageNumberParser>,
    config: &'a SyncConfig,
}

impl<'a> PageSynchronizer<'a> {
    pub fn new(
        driver: &'a mut dyn PageDriver,
        navigation: &'a Navigation,
        source_url: &'a str,
        parser: Option<&'a PageNumberParser>,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            driver,
            navigation,
            source_url,
            parser,
            config,
        }
    }

    /// Read and parse the UI's page indicator.
    pub async fn read_current_page(&mut self) -> Result<Option<u32>, DriverError> {
        let text = self
            .driver
            .read_text(&self.navigation.page_indicator)
            .await?;
        Ok(text.as_deref().and_then(|t| self.parse_page(t)))
    }

    fn parse_page(&self, text: &str) -> Option<u32> {
        match self.parser {
            Some(parser) => parser(text),
            None => FIRST_NUMBER
                .find(text)
                .and_then(|m| m.as_str().parse().ok()),
        }
    }

    /// Make the UI's declared current page equal `target`.
    ///
    /// Clicks exactly one step per iteration and re-reads the indicator, so
    /// a resumed page > 1 is reached by walking forward from wherever the
    /// UI actually is — some sources only expose relative navigation.
    ///
    /// The give-up budget is charged only for failed actions: driver
    /// errors, unreadable indicator reads, and steps where the indicator
    /// did not move. Successful progress toward the target is free, so a
    /// healthy UI converges to any reachable page regardless of distance.
    pub async fn sync_to(&mut self, target: u32) -> Result<(), SyncError> {
        let mut attempts: u32 = 0;
        let mut unreadable: u32 = 0;
        let mut last_error: Option<String> = None;
        let mut last_seen: Option<u32> = None;

        while attempts < self.config.give_up {
            match self.step(target, &mut unreadable).await {
                Ok(PageState::Synced) => {
                    debug!(page = target, attempts, "page synchronized");
                    return Ok(());
                }
                Ok(state @ (PageState::Behind(current) | PageState::Ahead(current))) => {
                    // A click that left the indicator where it was is a
                    // stall, not progress.
                    if last_seen == Some(current) {
                        attempts += 1;
                        warn!(page = target, current, attempts, "pagination stalled");
                    } else {
                        debug!(page = target, ?state, "sync step");
                    }
                    last_seen = Some(current);
                }
                Ok(PageState::DesyncUnknown) => {
                    attempts += 1;
                    debug!(page = target, attempts, "page indicator unreadable");
                }
                Err(error) => {
                    attempts += 1;
                    last_error = Some(error.to_string());
                    last_seen = None;
                    warn!(page = target, attempts, %error, "sync action failed, reloading source");
                    if let Err(reload_error) = self.reload().await {
                        attempts += 1;
                        last_error = Some(reload_error.to_string());
                        warn!(page = target, attempts, error = %reload_error, "reload failed");
                    }
                }
            }
        }

        Err(SyncError::GaveUp {
            target,
            attempts,
            last_error,
        })
    }

    /// One observe-act cycle. Never clicks "next" when ahead of the target
    /// nor "previous" when behind it.
    async fn step(&mut self, target: u32, unreadable: &mut u32) -> Result<PageState, DriverError> {
        let current = self.read_current_page().await?;
        let state = PageState::classify(current, target);

        match state {
            PageState::Synced => return Ok(state),
            PageState::DesyncUnknown => {
                *unreadable += 1;
                if *unreadable > self.config.reread_limit {
                    *unreadable = 0;
                    warn!(page = target, "page indicator unreadable, full reload");
                    self.reload().await?;
                } else {
                    // Nudge forward and re-read; many desyncs are a UI that
                    // simply has not rendered its indicator yet.
                    self.click_next(1).await?;
                }
            }
            PageState::Behind(current) => {
                *unreadable = 0;
                self.click_next(current).await?;
            }
            PageState::Ahead(_) => {
                *unreadable = 0;
                self.click_checked(&self.navigation.prev.clone()).await?;
            }
        }

        self.settle().await;
        Ok(state)
    }

    /// Click the "next" control, preferring the alternate selector some
    /// UIs swap in once past page 1.
    async fn click_next(&mut self, current: u32) -> Result<(), DriverError> {
        if current > 1 {
            if let Some(alt) = &self.navigation.alt_next.clone() {
                if self.driver.element_present(alt).await? {
                    return self.click_checked(alt).await;
                }
            }
        }
        self.click_checked(&self.navigation.next.clone()).await
    }

    async fn click_checked(&mut self, selector: &str) -> Result<(), DriverError> {
        let timeout = Duration::from_millis(self.config.wait_timeout_ms);
        self.driver.wait_clickable(selector, timeout).await?;
        self.driver.click(selector).await
    }

    async fn reload(&mut self) -> Result<(), DriverError> {
        self.driver.goto(self.source_url).await?;
        self.settle().await;
        Ok(())
    }

    async fn settle(&mut self) {
        if self.config.click_delay_ms > 0 {
            sleep(Duration::from_millis(self.config.click_delay_ms)).await;
        }
    }
}
