//! Chrome DevTools Protocol driver (feature `browser`).
//!
//! Each session owns a dedicated headless browser process plus its event
//! handler task. Table reads go through one in-page script so the text and
//! HTML cell twins come from the same render.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{DriverError, PageDriver, SessionFactory, TableRow};

/// Launch options for one CDP session.
#[derive(Debug, Clone)]
pub struct CdpConfig {
    pub headless: bool,
    /// Alternate browser binary; `None` lets chromiumoxide autodetect.
    pub executable: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// One live browser session driven over CDP.
pub struct CdpDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl CdpDriver {
    pub async fn launch(config: &CdpConfig) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder().request_timeout(config.request_timeout);
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &config.executable {
            builder = builder.chrome_executable(executable);
        }
        let browser_config = builder.build().map_err(DriverError::Backend)?;

        let (browser, mut events) = Browser::launch(browser_config)
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))?;

        // The handler stream must be drained for the connection to make
        // progress; it ends when the browser process goes away.
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))?;

        debug!("launched CDP session");
        Ok(Self {
            browser,
            page,
            handler,
        })
    }
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        // Render settles after the load event on some sources; a failed
        // extra wait is not fatal here.
        if let Err(e) = self.page.wait_for_navigation().await {
            debug!("wait_for_navigation after goto: {e}");
        }
        Ok(())
    }

    async fn read_table_rows(&mut self, selector: &str) -> Result<Vec<TableRow>, DriverError> {
        let selector_js =
            serde_json::to_string(selector).map_err(|e| DriverError::Backend(e.to_string()))?;
        let script = format!(
            r#"(() => {{
                const table = document.querySelector({selector_js});
                if (!table) return null;
                return Array.from(table.querySelectorAll('tr')).map(row => {{
                    const cells = Array.from(row.querySelectorAll('td, th'));
                    return {{
                        text: cells.map(c => c.innerText.replace(/\s+/g, ' ').trim()),
                        html: cells.map(c => c.innerHTML),
                    }};
                }}).filter(row => row.text.length > 0);
            }})()"#
        );
        let rows: Option<Vec<TableRow>> = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))?
            .into_value()
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        rows.ok_or_else(|| DriverError::NotFound(selector.to_string()))
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| DriverError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn element_present(&mut self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        match self.page.find_element(selector).await {
            Ok(element) => element
                .inner_text()
                .await
                .map_err(|e| DriverError::Backend(e.to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close failed: {e}");
        }
        self.handler.abort();
    }
}

/// Factory for CDP sessions. Two instances with different configs model a
/// primary backend and an alternate-binary fallback.
pub struct CdpSessionFactory {
    config: CdpConfig,
}

impl CdpSessionFactory {
    #[must_use]
    pub fn new(config: CdpConfig) -> Self {
        Self { config }
    }
}

impl Default for CdpSessionFactory {
    fn default() -> Self {
        Self::new(CdpConfig::default())
    }
}

#[async_trait]
impl SessionFactory for CdpSessionFactory {
    async fn create(&self) -> anyhow::Result<Box<dyn PageDriver>> {
        Ok(Box::new(CdpDriver::launch(&self.config).await?))
    }

    fn backend_name(&self) -> &'static str {
        "cdp"
    }
}
