//! End-to-end engine tests against a scripted in-memory paginated site.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use result_harvester::domain::{ColumnMap, FieldSpec, Navigation, PageDescriptor, YearRange};
use result_harvester::driver::{DriverError, PageDriver, SessionFactory, TableRow};
use result_harvester::infrastructure::config::HarvesterConfig;
use result_harvester::infrastructure::{DatabaseConnection, HarvestRepository};
use result_harvester::pipeline::PageCompletion;
use result_harvester::pool::{BrowserPool, PoolConfig};
use result_harvester::HarvestOrchestrator;

const ROWS_PER_PAGE: u32 = 10;

/// Shared scripted site: a paginated results table with a page indicator
/// and next/previous controls. Every session sees the same site but keeps
/// its own current-page position, like separate browser windows.
struct Site {
    last_page: u32,
}

struct SiteDriver {
    site: Arc<Mutex<Site>>,
    current_page: u32,
}

impl SiteDriver {
    fn last_page(&self) -> u32 {
        self.site.lock().unwrap().last_page
    }
}

#[async_trait]
impl PageDriver for SiteDriver {
    async fn goto(&mut self, _url: &str) -> Result<(), DriverError> {
        self.current_page = 1;
        Ok(())
    }

    async fn read_table_rows(&mut self, _selector: &str) -> Result<Vec<TableRow>, DriverError> {
        let header = TableRow {
            text: ["Place", "Time", "Age", "Gender"]
                .map(String::from)
                .to_vec(),
            html: ["Place", "Time", "Age", "Gender"]
                .map(String::from)
                .to_vec(),
        };
        let mut rows = vec![header];
        let base = (self.current_page - 1) * ROWS_PER_PAGE;
        for i in 1..=ROWS_PER_PAGE {
            let place = base + i;
            let cells: Vec<String> = vec![
                place.to_string(),
                format!("3:{:02}:00", place % 60),
                "35".to_string(),
                "M".to_string(),
            ];
            rows.push(TableRow {
                text: cells.clone(),
                html: cells,
            });
        }
        Ok(rows)
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        match selector {
            "a.next" => {
                let last = self.last_page();
                self.current_page = (self.current_page + 1).min(last);
                Ok(())
            }
            "a.prev" => {
                self.current_page = self.current_page.saturating_sub(1).max(1);
                Ok(())
            }
            other => Err(DriverError::NotFound(other.to_string())),
        }
    }

    async fn element_present(&mut self, _selector: &str) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn read_text(&mut self, selector: &str) -> Result<Option<String>, DriverError> {
        if selector == "span.page" {
            Ok(Some(format!(
                "Page {} of {}",
                self.current_page,
                self.last_page()
            )))
        } else {
            Ok(None)
        }
    }

    async fn close(&mut self) {}
}

struct SiteFactory {
    site: Arc<Mutex<Site>>,
}

#[async_trait]
impl SessionFactory for SiteFactory {
    async fn create(&self) -> anyhow::Result<Box<dyn PageDriver>> {
        Ok(Box::new(SiteDriver {
            site: Arc::clone(&self.site),
            current_page: 1,
        }))
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

struct Fixture {
    repository: HarvestRepository,
    orchestrator: HarvestOrchestrator,
    _dir: tempfile::TempDir,
}

async fn fixture(last_page: u32) -> Fixture {
    let dir = tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("engine.db").display());
    let db = DatabaseConnection::new(&url).await.unwrap();
    db.migrate().await.unwrap();
    let repository = HarvestRepository::new(db.pool().clone());

    let site = Arc::new(Mutex::new(Site { last_page }));
    let pool_config = PoolConfig {
        size: Some(2),
        startup_jitter: Duration::ZERO,
    };
    let pool = Arc::new(BrowserPool::new(&pool_config, Arc::new(SiteFactory { site })));

    let mut config = HarvesterConfig::default();
    config.harvest.request_delay_ms = 0;
    config.sync.click_delay_ms = 0;

    Fixture {
        repository: repository.clone(),
        orchestrator: HarvestOrchestrator::new(pool, repository, config),
        _dir: dir,
    }
}

fn descriptor(pages: u32) -> PageDescriptor {
    PageDescriptor::new(
        "https://results.example/2016",
        "berlin",
        2016,
        YearRange::new(2005, 2019),
        Navigation::new("a.next", "a.prev", "span.page"),
    )
    .with_table("table.results")
    .with_rows_trim(1, 0)
    .with_columns(ColumnMap {
        place: FieldSpec::at(0),
        finish_time: FieldSpec::at(1),
        age: FieldSpec::at(2),
        gender: FieldSpec::at(3),
        ..ColumnMap::empty()
    })
    .with_pages(1, pages)
}

#[tokio::test]
async fn full_run_persists_every_page() {
    let f = fixture(3).await;
    let report = f.orchestrator.run(vec![descriptor(3)]).await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.worker_stats.pages, 3);
    assert_eq!(report.worker_stats.saved, 30);
    assert_eq!(report.worker_stats.duplicates, 0);

    assert_eq!(f.repository.count_records().await.unwrap(), 30);
    assert_eq!(f.repository.count_completions().await.unwrap(), 3);

    let records = f.repository.find_by_source("berlin", 2016).await.unwrap();
    assert_eq!(records.len(), 30);
    assert_eq!(records.first().unwrap().place, 1);
    assert_eq!(records.last().unwrap().place, 30);
}

#[tokio::test]
async fn rerun_harvests_nothing_new() {
    let f = fixture(3).await;
    f.orchestrator.run(vec![descriptor(3)]).await;
    let second = f.orchestrator.run(vec![descriptor(3)]).await;

    assert_eq!(second.succeeded(), 1);
    // Resume saw everything completed, so no pages were even visited.
    assert_eq!(second.worker_stats.pages, 0);
    assert_eq!(f.repository.count_records().await.unwrap(), 30);
    assert_eq!(f.repository.count_completions().await.unwrap(), 3);
}

#[tokio::test]
async fn interrupted_job_resumes_past_completed_pages() {
    let f = fixture(10).await;

    // A previous run finished pages 1..=3 before dying.
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

    let report = f.orchestrator.run(vec![descriptor(10)]).await;
    let outcome = report.outcomes.first().unwrap();
    let harvest = outcome.result.as_ref().unwrap();

    assert_eq!(harvest.resumed_from, 4);
    assert_eq!(harvest.pages, 7);
    assert_eq!(harvest.rows_kept, 70);
    assert_eq!(harvest.rows_dropped, 0);

    // Pages 4..=10 contribute places 31..=100.
    let records = f.repository.find_by_source("berlin", 2016).await.unwrap();
    assert_eq!(records.len(), 70);
    assert_eq!(records.first().unwrap().place, 31);
    assert_eq!(records.last().unwrap().place, 100);
    assert_eq!(f.repository.count_completions().await.unwrap(), 10);
}

#[tokio::test]
async fn resume_converges_past_the_sync_failure_budget() {
    let f = fixture(15).await;

    // More completed pages than the sync give-up budget (default 10):
    // reaching page 13 takes 12 successful forward clicks.
    for page in 1..=12 {
        let completion = PageCompletion {
            source_id: "berlin".into(),
            year: 2016,
            category: None,
            page,
            url: "https://results.example/2016".into(),
        };
        f.repository.save_completion(&completion, &[]).await.unwrap();
    }

    let report = f.orchestrator.run(vec![descriptor(15)]).await;
    let harvest = report.outcomes.first().unwrap().result.as_ref().unwrap();

    assert_eq!(harvest.resumed_from, 13);
    assert_eq!(harvest.pages, 3);
    assert_eq!(harvest.rows_kept, 30);

    let records = f.repository.find_by_source("berlin", 2016).await.unwrap();
    assert_eq!(records.first().unwrap().place, 121);
    assert_eq!(records.last().unwrap().place, 150);
}

#[tokio::test]
async fn categorized_jobs_run_concurrently_without_clashing() {
    let f = fixture(2).await;
    let men = descriptor(2).with_category("M");
    let women = descriptor(2).with_category("W");

    let report = f.orchestrator.run(vec![men, women]).await;
    assert_eq!(report.succeeded(), 2);
    // Same places per category; the category column keeps them distinct.
    assert_eq!(f.repository.count_records().await.unwrap(), 40);
    assert_eq!(f.repository.count_completions().await.unwrap(), 4);
}

#[tokio::test]
async fn unpaginated_source_is_harvested_once() {
    let f = fixture(1).await;
    let single = descriptor(1).unpaginated();

    let first = f.orchestrator.run(vec![single.clone()]).await;
    assert_eq!(first.worker_stats.pages, 1);
    assert_eq!(f.repository.count_records().await.unwrap(), 10);

    let second = f.orchestrator.run(vec![single]).await;
    assert_eq!(second.succeeded(), 1);
    assert_eq!(second.worker_stats.pages, 0);
    assert_eq!(f.repository.count_records().await.unwrap(), 10);
}
