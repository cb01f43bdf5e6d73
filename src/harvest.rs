//! The harvest unit: one job, one leased session, one pass over pages.
//!
//! A unit is handed a [`PageDescriptor`], leases a session from the pool,
//! walks pages from the resume point to the descriptor's end page, and
//! submits one [`PageBatch`] per page into the ingestion queue. Row-level
//! defects are logged and dropped; page-level failures abort the job with
//! the page number attached.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::domain::PageDescriptor;
use crate::driver::{DriverError, TableRow};
use crate::extraction::extract_row_logged;
use crate::infrastructure::config::HarvestSettings;
use crate::pipeline::{IngestionQueue, PageBatch, PageCompletion};
use crate::pool::{BrowserPool, PoolError, SessionLease};
use crate::resume::ResumePoint;
use crate::sync::{PageSynchronizer, SyncConfig, SyncError};

/// Harvest job failures. Row-level defects never surface here; they are
/// dropped inside the page loop.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("invalid page range: start {start} > end {end}")]
    InvalidRange { start: u32, end: u32 },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to synchronize to page {page}: {source}")]
    Sync { page: u32, source: SyncError },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("ingestion queue closed before the job finished")]
    QueueClosed,

    #[error("resume-point lookup failed: {0}")]
    Resume(#[source] anyhow::Error),

    #[error("job aborted: {0}")]
    Aborted(String),
}

/// What one job accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestReport {
    pub job: String,
    pub pages: u32,
    pub rows_kept: u64,
    pub rows_dropped: u64,
    /// Page the run actually started at, after resume.
    pub resumed_from: u32,
}

/// Executes one harvest job end to end.
#[derive(Clone)]
pub struct HarvestUnit {
    pool: Arc<BrowserPool>,
    resume: ResumePoint,
    queue: IngestionQueue,
    settings: HarvestSettings,
    sync_config: SyncConfig,
}

impl HarvestUnit {
    pub fn new(
        pool: Arc<BrowserPool>,
        resume: ResumePoint,
        queue: IngestionQueue,
        settings: HarvestSettings,
        sync_config: SyncConfig,
    ) -> Self {
        Self {
            pool,
            resume,
            queue,
            settings,
            sync_config,
        }
    }

    /// Harvest every outstanding page of the descriptor's job.
    pub async fn run(&self, descriptor: &PageDescriptor) -> Result<HarvestReport, HarvestError> {
        if !descriptor.paginated {
            return self.run_single(descriptor).await;
        }

        let (start, end) = (descriptor.start_page, descriptor.end_page);
        if start > end {
            return Err(HarvestError::InvalidRange { start, end });
        }

        let resume_page = self
            .resume
            .next_page(
                &descriptor.source_id,
                descriptor.year,
                descriptor.category.as_deref(),
            )
            .await
            .map_err(HarvestError::Resume)?;
        let first = start.max(resume_page);

        if first > end {
            info!(job = %descriptor.job_key(), "job already complete, nothing to harvest");
            return Ok(HarvestReport {
                job: descriptor.job_key(),
                pages: 0,
                rows_kept: 0,
                rows_dropped: 0,
                resumed_from: first,
            });
        }

        let mut lease = self.pool.acquire().await?;
        let outcome = self.harvest_pages(descriptor, &mut lease, first, end).await;
        lease.release().await;

        let report = outcome?;
        info!(
            job = %report.job,
            pages = report.pages,
            rows_kept = report.rows_kept,
            rows_dropped = report.rows_dropped,
            resumed_from = report.resumed_from,
            "harvest job finished"
        );
        Ok(report)
    }

    async fn harvest_pages(
        &self,
        descriptor: &PageDescriptor,
        lease: &mut SessionLease,
        first: u32,
        end: u32,
    ) -> Result<HarvestReport, HarvestError> {
        let driver = lease.driver_mut();
        driver.goto(&descriptor.url).await?;

        let mut report = HarvestReport {
            job: descriptor.job_key(),
            pages: 0,
            rows_kept: 0,
            rows_dropped: 0,
            resumed_from: first,
        };

        for page in first..=end {
            {
                let mut sync = PageSynchronizer::new(
                    &mut *driver,
                    &descriptor.navigation,
                    &descriptor.url,
                    descriptor.page_number_parser.as_ref(),
                    &self.sync_config,
                );
                sync.sync_to(page)
                    .await
                    .map_err(|source| HarvestError::Sync { page, source })?;
            }

            self.polite_delay().await;

            let rows = driver.read_table_rows(&descriptor.table_selector).await?;
            let records = self.extract_page(descriptor, rows, &mut report);
            self.submit(descriptor, page, records).await?;
            report.pages += 1;
        }

        Ok(report)
    }

    /// Single-shot path for sources that publish the whole result set on
    /// one page. Skipped entirely when the URL is already marked complete.
    async fn run_single(
        &self,
        descriptor: &PageDescriptor,
    ) -> Result<HarvestReport, HarvestError> {
        let mut report = HarvestReport {
            job: descriptor.job_key(),
            pages: 0,
            rows_kept: 0,
            rows_dropped: 0,
            resumed_from: 1,
        };

        if self
            .resume
            .already_harvested(&descriptor.url)
            .await
            .map_err(HarvestError::Resume)?
        {
            info!(job = %report.job, url = %descriptor.url, "source already harvested, skipping");
            return Ok(report);
        }

        let mut lease = self.pool.acquire().await?;
        let outcome = async {
            let driver = lease.driver_mut();
            driver.goto(&descriptor.url).await?;
            self.polite_delay().await;
            let rows = driver.read_table_rows(&descriptor.table_selector).await?;
            let records = self.extract_page(descriptor, rows, &mut report);
            self.submit(descriptor, 1, records).await?;
            report.pages = 1;
            Ok::<(), HarvestError>(())
        }
        .await;
        lease.release().await;
        outcome?;

        info!(job = %report.job, rows_kept = report.rows_kept, "single-page harvest finished");
        Ok(report)
    }

    /// Trim header and trailing rows, then extract; defective rows are
    /// counted and dropped.
    fn extract_page(
        &self,
        descriptor: &PageDescriptor,
        rows: Vec<TableRow>,
        report: &mut HarvestReport,
    ) -> Vec<crate::domain::ResultRecord> {
        let body_len = rows
            .len()
            .saturating_sub(descriptor.header_rows)
            .saturating_sub(descriptor.trailing_rows);
        if body_len == 0 && !rows.is_empty() {
            warn!(job = %descriptor.job_key(), total = rows.len(), "table has no body rows after trim");
        }

        rows.into_iter()
            .skip(descriptor.header_rows)
            .take(body_len)
            .filter_map(|row| match extract_row_logged(descriptor, &row) {
                Ok(record) => {
                    report.rows_kept += 1;
                    Some(record)
                }
                Err(_) => {
                    report.rows_dropped += 1;
                    None
                }
            })
            .collect()
    }

    async fn submit(
        &self,
        descriptor: &PageDescriptor,
        page: u32,
        records: Vec<crate::domain::ResultRecord>,
    ) -> Result<(), HarvestError> {
        let batch = PageBatch {
            completion: PageCompletion {
                source_id: descriptor.source_id.clone(),
                year: descriptor.year,
                category: descriptor.category.clone(),
                page,
                url: descriptor.url.clone(),
            },
            records,
        };
        self.queue
            .submit(batch)
            .await
            .map_err(|_| HarvestError::QueueClosed)
    }

    /// Jittered politeness pause between page reads.
    async fn polite_delay(&self) {
        let base = self.settings.request_delay_ms;
        if base == 0 {
            return;
        }
        let ms = base / 2 + fastrand::u64(..base);
        sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Navigation, YearRange};
    use crate::infrastructure::{DatabaseConnection, HarvestRepository};
    use crate::pipeline::ingestion_channel;
    use crate::pool::PoolConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Factory that must never be asked for a session.
    struct PanickyFactory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl crate::driver::SessionFactory for PanickyFactory {
        async fn create(&self) -> anyhow::Result<Box<dyn crate::driver::PageDriver>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("no session expected in this test")
        }
        fn backend_name(&self) -> &'static str {
            "panicky"
        }
    }

    struct Fixture {
        unit: HarvestUnit,
        factory: Arc<PanickyFactory>,
        repository: HarvestRepository,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("unit.db").display());
        let db = DatabaseConnection::new(&url).await.unwrap();
        db.migrate().await.unwrap();
        let repository = HarvestRepository::new(db.pool().clone());

        let factory = Arc::new(PanickyFactory {
            calls: AtomicUsize::new(0),
        });
        let pool_config = PoolConfig {
            size: Some(1),
            startup_jitter: Duration::ZERO,
        };
        let pool = Arc::new(BrowserPool::new(&pool_config, factory.clone() as _));
        let (queue, _rx) = ingestion_channel(4);

        let unit = HarvestUnit::new(
            pool,
            ResumePoint::new(repository.clone()),
            queue,
            crate::infrastructure::config::HarvestSettings::default(),
            SyncConfig::default(),
        );
        Fixture {
            unit,
            factory,
            repository,
            _dir: dir,
        }
    }

    fn descriptor(start: u32, end: u32) -> PageDescriptor {
        PageDescriptor::new(
            "https://results.example/2016",
            "berlin",
            2016,
            YearRange::new(2005, 2019),
            Navigation::new("a.next", "a.prev", "span.page"),
        )
        .with_pages(start, end)
    }

    #[tokio::test]
    async fn inverted_range_fails_before_leasing_a_session() {
        let f = fixture().await;
        let err = f.unit.run(&descriptor(5, 2)).await.unwrap_err();
        assert!(matches!(err, HarvestError::InvalidRange { start: 5, end: 2 }));
        assert_eq!(f.factory.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fully_resumed_job_skips_session_lease() {
        let f = fixture().await;
        for page in 1..=3 {
            let completion = PageCompletion {
                source_id: "berlin".into(),
                year: 2016,
                category: None,
                page,
                url: "https://results.example/2016".into(),
            };
            f.repository.save_completion(&completion, &[]).await.unwrap();
        }

        let report = f.unit.run(&descriptor(1, 3)).await.unwrap();
        assert_eq!(report.pages, 0);
        assert_eq!(report.resumed_from, 4);
        assert_eq!(f.factory.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_failure_surfaces_as_pool_error() {
        let f = fixture().await;
        let err = f.unit.run(&descriptor(1, 2)).await.unwrap_err();
        assert!(matches!(err, HarvestError::Pool(_)));
        assert_eq!(f.factory.calls.load(Ordering::SeqCst), 1);
    }
}
