//! Permit-bounded pool of browser-automation sessions.
//!
//! Each session costs a full browser process, so concurrency is capped by a
//! semaphore sized to the machine (one session per core by default). Excess
//! harvest jobs block on [`BrowserPool::acquire`], which is what gives the
//! whole engine natural backpressure against resource exhaustion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::driver::{PageDriver, SessionFactory};

/// Pool sizing and session startup behavior.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Permit count; `None` = one per available core.
    pub size: Option<usize>,
    /// Randomized delay before each session launch, to avoid a thundering
    /// herd of browser startups against the remote site.
    pub startup_jitter: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: None,
            startup_jitter: Duration::from_millis(1500),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn effective_size(&self) -> usize {
        self.size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        })
    }
}

/// Pool acquisition failures.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("browser pool is closed")]
    Closed,

    #[error("session creation failed on every backend: {0}")]
    SessionCreation(String),
}

/// Bounded set of permits gating concurrent automation sessions.
pub struct BrowserPool {
    permits: Arc<Semaphore>,
    primary: Arc<dyn SessionFactory>,
    fallback: Option<Arc<dyn SessionFactory>>,
    startup_jitter: Duration,
    size: usize,
}

impl BrowserPool {
    #[must_use]
    pub fn new(config: &PoolConfig, primary: Arc<dyn SessionFactory>) -> Self {
        let size = config.effective_size();
        info!(
            size,
            backend = primary.backend_name(),
            "created browser pool"
        );
        Self {
            permits: Arc::new(Semaphore::new(size)),
            primary,
            fallback: None,
            startup_jitter: config.startup_jitter,
            size,
        }
    }

    /// Alternate backend used when the primary cannot start a session.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn SessionFactory>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Blocks until a permit is free, then creates a fresh session.
    ///
    /// The permit travels inside the returned lease, so it is returned on
    /// every path — including session-creation failure, where the permit
    /// guard is dropped as this function unwinds with the error.
    pub async fn acquire(&self) -> Result<SessionLease, PoolError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        if !self.startup_jitter.is_zero() {
            let jitter_ms = fastrand::u64(0..=self.startup_jitter.as_millis() as u64);
            sleep(Duration::from_millis(jitter_ms)).await;
        }

        let session_id = Uuid::new_v4();
        match self.primary.create().await {
            Ok(driver) => {
                debug!(%session_id, backend = self.primary.backend_name(), "session leased");
                Ok(SessionLease {
                    driver,
                    session_id,
                    backend: self.primary.backend_name(),
                    _permit: permit,
                })
            }
            Err(primary_err) => {
                let Some(fallback) = &self.fallback else {
                    return Err(PoolError::SessionCreation(primary_err.to_string()));
                };
                warn!(
                    backend = self.primary.backend_name(),
                    error = %primary_err,
                    "primary backend failed to start, trying {}",
                    fallback.backend_name()
                );
                let driver = fallback.create().await.map_err(|fallback_err| {
                    PoolError::SessionCreation(format!(
                        "{}: {primary_err}; {}: {fallback_err}",
                        self.primary.backend_name(),
                        fallback.backend_name()
                    ))
                })?;
                debug!(%session_id, backend = fallback.backend_name(), "session leased (fallback)");
                Ok(SessionLease {
                    driver,
                    session_id,
                    backend: fallback.backend_name(),
                    _permit: permit,
                })
            }
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits currently free (sessions not leased).
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A leased session. Holds its pool permit; dropping the lease frees the
/// permit, so callers cannot leak pool capacity on error paths.
pub struct SessionLease {
    driver: Box<dyn PageDriver>,
    session_id: Uuid,
    backend: &'static str,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    #[must_use]
    pub fn driver_mut(&mut self) -> &mut dyn PageDriver {
        self.driver.as_mut()
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Close the session and return the permit.
    pub async fn release(mut self) {
        self.driver.close().await;
        debug!(session_id = %self.session_id, "session released");
    }
}
