//! Top-level run orchestration.
//!
//! Wires the pool, ingestion pipeline and harvest units together for one
//! run over a set of descriptors: spawns persistence workers, runs every
//! job concurrently (bounded by the pool), then closes the queue and waits
//! for the workers to drain. Only if draining exceeds the shutdown timeout
//! is the cancellation token fired.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::PageDescriptor;
use crate::harvest::{HarvestError, HarvestReport, HarvestUnit};
use crate::infrastructure::{HarvestRepository, HarvesterConfig};
use crate::pipeline::{ingestion_channel, spawn_workers, WorkerStats};
use crate::pool::BrowserPool;
use crate::resume::ResumePoint;

/// One descriptor's result within a run.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: String,
    pub result: Result<HarvestReport, HarvestError>,
}

/// Aggregate result of one orchestrated run.
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<JobOutcome>,
    pub worker_stats: WorkerStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

pub struct HarvestOrchestrator {
    pool: Arc<BrowserPool>,
    repository: HarvestRepository,
    config: HarvesterConfig,
    cancel: CancellationToken,
}

impl HarvestOrchestrator {
    pub fn new(
        pool: Arc<BrowserPool>,
        repository: HarvestRepository,
        config: HarvesterConfig,
    ) -> Self {
        Self {
            pool,
            repository,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for wiring external shutdown signals.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fire this run's cancellation token when the process receives ctrl-c.
    pub fn cancel_on_ctrl_c(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    /// Run every descriptor to completion and drain the pipeline.
    pub async fn run(&self, descriptors: Vec<PageDescriptor>) -> RunReport {
        let started_at = Utc::now();
        let (queue, rx) = ingestion_channel(self.config.pipeline.queue_capacity);
        let workers = spawn_workers(
            self.config.pipeline.workers,
            &self.repository,
            rx,
            &self.cancel,
        );

        let unit = HarvestUnit::new(
            Arc::clone(&self.pool),
            ResumePoint::new(self.repository.clone()),
            queue,
            self.config.harvest.clone(),
            self.config.sync.clone(),
        );

        info!(jobs = descriptors.len(), sessions = self.pool.size(), "run started");

        let (jobs, handles): (Vec<_>, Vec<_>) = descriptors
            .into_iter()
            .map(|descriptor| {
                let unit = unit.clone();
                let job = descriptor.job_key();
                let handle = tokio::spawn(async move { unit.run(&descriptor).await });
                (job, handle)
            })
            .unzip();
        // The spawned units hold the only remaining queue handles; once
        // they all finish, the channel closes and the workers drain out.
        drop(unit);

        let joined = futures::future::join_all(handles).await;

        let mut outcomes = Vec::with_capacity(jobs.len());
        for (job, joined) in jobs.into_iter().zip(joined) {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => Err(HarvestError::Aborted(join_error.to_string())),
            };
            match &result {
                Ok(report) => info!(
                    %job,
                    pages = report.pages,
                    rows_kept = report.rows_kept,
                    rows_dropped = report.rows_dropped,
                    "job succeeded"
                ),
                Err(err) => error!(%job, error = %err, "job failed"),
            }
            outcomes.push(JobOutcome { job, result });
        }

        let worker_stats = self.drain_workers(workers).await;

        let report = RunReport {
            outcomes,
            worker_stats,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            pages = report.worker_stats.pages,
            saved = report.worker_stats.saved,
            duplicates = report.worker_stats.duplicates,
            anomalies = report.worker_stats.anomalies,
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "run finished"
        );
        report
    }

    async fn drain_workers(
        &self,
        workers: Vec<tokio::task::JoinHandle<WorkerStats>>,
    ) -> WorkerStats {
        let shutdown = Duration::from_secs(self.config.pipeline.shutdown_timeout_secs);
        let drain = async {
            let mut stats = WorkerStats::default();
            for handle in workers {
                if let Ok(worker) = handle.await {
                    stats.merge(&worker);
                }
            }
            stats
        };

        match timeout(shutdown, drain).await {
            Ok(stats) => stats,
            Err(_) => {
                warn!(
                    timeout_secs = shutdown.as_secs(),
                    "persistence workers did not drain in time, cancelling"
                );
                self.cancel.cancel();
                WorkerStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, PageDriver, SessionFactory, TableRow};
    use crate::infrastructure::DatabaseConnection;
    use crate::pool::PoolConfig;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct NullDriver;

    #[async_trait]
    impl PageDriver for NullDriver {
        async fn goto(&mut self, _url: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn read_table_rows(&mut self, _s: &str) -> Result<Vec<TableRow>, DriverError> {
            Ok(Vec::new())
        }
        async fn click(&mut self, _s: &str) -> Result<(), DriverError> {
            Ok(())
        }
        async fn element_present(&mut self, _s: &str) -> Result<bool, DriverError> {
            Ok(false)
        }
        async fn read_text(&mut self, _s: &str) -> Result<Option<String>, DriverError> {
            Ok(None)
        }
        async fn close(&mut self) {}
    }

    struct NullFactory;

    #[async_trait]
    impl SessionFactory for NullFactory {
        async fn create(&self) -> anyhow::Result<Box<dyn PageDriver>> {
            Ok(Box::new(NullDriver))
        }
        fn backend_name(&self) -> &'static str {
            "null"
        }
    }

    #[tokio::test]
    async fn empty_run_drains_cleanly() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("run.db").display());
        let db = DatabaseConnection::new(&url).await.unwrap();
        db.migrate().await.unwrap();
        let repository = HarvestRepository::new(db.pool().clone());

        let pool_config = PoolConfig {
            size: Some(1),
            startup_jitter: Duration::ZERO,
        };
        let pool = Arc::new(BrowserPool::new(&pool_config, Arc::new(NullFactory)));
        let orchestrator =
            HarvestOrchestrator::new(pool, repository, HarvesterConfig::default());

        let report = orchestrator.run(Vec::new()).await;
        assert_eq!(report.outcomes.len(), 0);
        assert_eq!(report.worker_stats, WorkerStats::default());
        assert!(report.finished_at >= report.started_at);
    }
}
