//! Resume-point calculation over page-completion markers.
//!
//! The resume point is purely a function of persisted completion markers:
//! the first page to harvest is one past the highest completed page for
//! the job. Gaps below the maximum are deliberately ignored; a gap means a
//! page persisted out of order, and its records are already protected by
//! the duplicate-swallowing unique key if it is ever revisited.

use anyhow::Result;
use tracing::debug;

use crate::infrastructure::HarvestRepository;

#[derive(Clone)]
pub struct ResumePoint {
    repository: HarvestRepository,
}

impl ResumePoint {
    pub fn new(repository: HarvestRepository) -> Self {
        Self { repository }
    }

    /// First page still needing harvest for this job; `1` on a fresh job.
    pub async fn next_page(
        &self,
        source_id: &str,
        year: u16,
        category: Option<&str>,
    ) -> Result<u32> {
        let max = self
            .repository
            .max_completed_page(source_id, year, category)
            .await?;
        let next = max.map_or(1, |page| page + 1);
        debug!(source_id, year, category, next, "computed resume point");
        Ok(next)
    }

    /// Whether an unpaginated source URL was already harvested.
    pub async fn already_harvested(&self, url: &str) -> Result<bool> {
        self.repository.already_harvested(url).await
    }
}
