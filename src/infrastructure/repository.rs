//! Repository for harvested records and page-completion markers.
//!
//! Records and the marker for the page they came from are committed in one
//! transaction, so a crash can never leave a page marked complete with its
//! rows missing (or rows saved for a page the resume calculator will
//! re-harvest anyway).

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::domain::ResultRecord;
use crate::pipeline::PageCompletion;

/// What one page batch did to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: u64,
    /// Duplicates swallowed by the unique key, not errors.
    pub skipped: u64,
}

#[derive(Clone)]
pub struct HarvestRepository {
    pool: SqlitePool,
}

impl HarvestRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a single record; returns `true` when it was new.
    pub async fn save_record(&self, record: &ResultRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO results
                (source_id, year, category, place, age, gender,
                 nationality, finish_time, split_time, affiliation)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.source_id)
        .bind(i64::from(record.year))
        .bind(record.category_key())
        .bind(i64::from(record.place))
        .bind(&record.age)
        .bind(&record.gender)
        .bind(&record.nationality)
        .bind(&record.finish_time)
        .bind(&record.split_time)
        .bind(&record.affiliation)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically persist a page's records and its completion marker.
    pub async fn save_completion(
        &self,
        completion: &PageCompletion,
        records: &[ResultRecord],
    ) -> Result<BatchOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = BatchOutcome::default();

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO results
                    (source_id, year, category, place, age, gender,
                     nationality, finish_time, split_time, affiliation)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.source_id)
            .bind(i64::from(record.year))
            .bind(record.category_key())
            .bind(i64::from(record.place))
            .bind(&record.age)
            .bind(&record.gender)
            .bind(&record.nationality)
            .bind(&record.finish_time)
            .bind(&record.split_time)
            .bind(&record.affiliation)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                outcome.inserted += 1;
            } else {
                outcome.skipped += 1;
            }
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO page_completions
                (source_id, year, category, page, url)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&completion.source_id)
        .bind(i64::from(completion.year))
        .bind(completion.category_key())
        .bind(i64::from(completion.page))
        .bind(&completion.url)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            source = %completion.source_id,
            page = completion.page,
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            "page batch committed"
        );
        Ok(outcome)
    }

    /// Highest completed page for one (source, year, category) job.
    pub async fn max_completed_page(
        &self,
        source_id: &str,
        year: u16,
        category: Option<&str>,
    ) -> Result<Option<u32>> {
        let row = sqlx::query(
            r#"
            SELECT MAX(page) AS max_page FROM page_completions
            WHERE source_id = ? AND year = ? AND category = ?
            "#,
        )
        .bind(source_id)
        .bind(i64::from(year))
        .bind(category.unwrap_or(""))
        .fetch_one(&self.pool)
        .await?;

        let max_page: Option<i64> = row.get("max_page");
        Ok(max_page.map(|p| p as u32))
    }

    /// Whether any completion marker exists for this URL. Used to gate
    /// single-page (unpaginated) sources.
    pub async fn already_harvested(&self, url: &str) -> Result<bool> {
        let row =
            sqlx::query("SELECT EXISTS(SELECT 1 FROM page_completions WHERE url = ?) AS hit")
                .bind(url)
                .fetch_one(&self.pool)
                .await?;
        let hit: i64 = row.get("hit");
        Ok(hit != 0)
    }

    pub async fn find_by_source(&self, source_id: &str, year: u16) -> Result<Vec<ResultRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, year, category, place, age, gender,
                   nationality, finish_time, split_time, affiliation
            FROM results
            WHERE source_id = ? AND year = ?
            ORDER BY category, place
            "#,
        )
        .bind(source_id)
        .bind(i64::from(year))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let category: String = row.get("category");
                let year: i64 = row.get("year");
                let place: i64 = row.get("place");
                ResultRecord {
                    source_id: row.get("source_id"),
                    year: year as u16,
                    category: (!category.is_empty()).then_some(category),
                    place: place as u32,
                    age: row.get("age"),
                    gender: row.get("gender"),
                    nationality: row.get("nationality"),
                    finish_time: row.get("finish_time"),
                    split_time: row.get("split_time"),
                    affiliation: row.get("affiliation"),
                }
            })
            .collect())
    }

    pub async fn count_records(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM results")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_completions(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM page_completions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UNAVAILABLE;
    use crate::infrastructure::DatabaseConnection;
    use tempfile::tempdir;

    async fn repo() -> (HarvestRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("repo.db").display());
        let db = DatabaseConnection::new(&url).await.unwrap();
        db.migrate().await.unwrap();
        (HarvestRepository::new(db.pool().clone()), dir)
    }

    fn record(place: u32) -> ResultRecord {
        ResultRecord {
            source_id: "berlin".into(),
            year: 2016,
            category: None,
            place,
            age: "35".into(),
            gender: "M".into(),
            nationality: "GER".into(),
            finish_time: "3:15:00".into(),
            split_time: UNAVAILABLE.into(),
            affiliation: UNAVAILABLE.into(),
        }
    }

    fn completion(page: u32) -> PageCompletion {
        PageCompletion {
            source_id: "berlin".into(),
            year: 2016,
            category: None,
            page,
            url: format!("https://results.example/2016?page={page}"),
        }
    }

    #[tokio::test]
    async fn batch_commits_records_and_marker_together() {
        let (repo, _dir) = repo().await;
        let outcome = repo
            .save_completion(&completion(1), &[record(1), record(2)])
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome { inserted: 2, skipped: 0 });
        assert_eq!(repo.count_records().await.unwrap(), 2);
        assert_eq!(repo.max_completed_page("berlin", 2016, None).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn replaying_a_batch_is_idempotent() {
        let (repo, _dir) = repo().await;
        let records = [record(1), record(2), record(3)];
        repo.save_completion(&completion(1), &records).await.unwrap();
        let second = repo.save_completion(&completion(1), &records).await.unwrap();

        assert_eq!(second, BatchOutcome { inserted: 0, skipped: 3 });
        assert_eq!(repo.count_records().await.unwrap(), 3);
        assert_eq!(repo.count_completions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn category_partitions_the_completion_key() {
        let (repo, _dir) = repo().await;
        let mut half = completion(4);
        half.category = Some("half".into());
        repo.save_completion(&half, &[]).await.unwrap();
        repo.save_completion(&completion(2), &[]).await.unwrap();

        assert_eq!(
            repo.max_completed_page("berlin", 2016, Some("half")).await.unwrap(),
            Some(4)
        );
        assert_eq!(repo.max_completed_page("berlin", 2016, None).await.unwrap(), Some(2));
        assert_eq!(repo.max_completed_page("berlin", 2015, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_single_record_is_swallowed() {
        let (repo, _dir) = repo().await;
        assert!(repo.save_record(&record(7)).await.unwrap());
        assert!(!repo.save_record(&record(7)).await.unwrap());
        assert_eq!(repo.count_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn url_lookup_sees_only_completed_pages() {
        let (repo, _dir) = repo().await;
        let marker = completion(1);
        assert!(!repo.already_harvested(&marker.url).await.unwrap());
        repo.save_completion(&marker, &[record(1)]).await.unwrap();
        assert!(repo.already_harvested(&marker.url).await.unwrap());
    }

    #[tokio::test]
    async fn find_by_source_round_trips_category() {
        let (repo, _dir) = repo().await;
        let mut r = record(1);
        r.category = Some("half".into());
        repo.save_record(&r).await.unwrap();
        repo.save_record(&record(2)).await.unwrap();

        let found = repo.find_by_source("berlin", 2016).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|x| x.category.as_deref() == Some("half")));
        assert!(found.iter().any(|x| x.category.is_none()));
    }
}
