//! Remote-control boundary to a single browser session.
//!
//! The engine never talks to an automation backend directly; it drives a
//! [`PageDriver`]. The CDP implementation (feature `browser`) handles
//! JavaScript-heavy sources, the HTTP implementation serves as the fallback
//! backend when a real browser cannot start, and tests script their own.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

#[cfg(feature = "browser")]
pub mod cdp;
pub mod http;

/// One raw table row, as parallel text and HTML cell lists. The HTML twin
/// exists for attribute-only fields (e.g. nationality flag images).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub text: Vec<String>,
    pub html: Vec<String>,
}

/// Errors surfaced by a page driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("navigation to '{url}' failed: {message}")]
    Navigation { url: String, message: String },

    #[error("invalid selector '{0}'")]
    Selector(String),

    #[error("no element matches '{0}'")]
    NotFound(String),

    #[error("element '{selector}' not clickable within {waited:?}")]
    Timeout { selector: String, waited: Duration },

    #[error("operation not supported by this backend: {0}")]
    Unsupported(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Remote control over one live browser session.
///
/// All methods take `&mut self`: a session is owned by exactly one harvest
/// unit at a time (the pool enforces this), so drivers keep per-session
/// state such as the current document without internal locking.
#[async_trait]
pub trait PageDriver: Send {
    /// Navigate the session to `url` and wait for the page to render.
    async fn goto(&mut self, url: &str) -> Result<(), DriverError>;

    /// Read every row of the table addressed by `selector`.
    async fn read_table_rows(&mut self, selector: &str) -> Result<Vec<TableRow>, DriverError>;

    /// Click the first element matching `selector`.
    async fn click(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Whether any element currently matches `selector`.
    async fn element_present(&mut self, selector: &str) -> Result<bool, DriverError>;

    /// Text content of the first element matching `selector`, if any.
    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError>;

    /// Bounded poll until `selector` is present and clickable.
    ///
    /// Default implementation polls [`Self::element_present`]; backends with
    /// a real readiness signal override it.
    async fn wait_clickable(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let poll = Duration::from_millis(250);
        let mut waited = Duration::ZERO;
        loop {
            if self.element_present(selector).await? {
                return Ok(());
            }
            if waited >= timeout {
                return Err(DriverError::Timeout {
                    selector: selector.to_string(),
                    waited,
                });
            }
            sleep(poll).await;
            waited += poll;
        }
    }

    /// Release backend resources. Best effort; errors are logged, not raised.
    async fn close(&mut self);
}

/// Creates fresh driver sessions for the pool.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> anyhow::Result<Box<dyn PageDriver>>;

    /// Backend name for pool logs ("cdp", "http", ...).
    fn backend_name(&self) -> &'static str;
}
