//! SQLite connection and schema management via sqlx.

use std::path::Path;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        // sqlx will not create the file or its parents on its own.
        if let Some(parent) = Path::new(db_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !Path::new(db_path).exists() {
            std::fs::File::create(db_path)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS results (
                source_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                place INTEGER NOT NULL,
                age TEXT NOT NULL,
                gender TEXT NOT NULL,
                nationality TEXT NOT NULL,
                finish_time TEXT NOT NULL,
                split_time TEXT NOT NULL,
                affiliation TEXT NOT NULL,
                collected_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (source_id, year, category, place)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS page_completions (
                source_id TEXT NOT NULL,
                year INTEGER NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                page INTEGER NOT NULL,
                url TEXT NOT NULL,
                completed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (source_id, year, category, page)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_results_source_year ON results (source_id, year)",
            "CREATE INDEX IF NOT EXISTS idx_completions_url ON page_completions (url)",
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }
}

/// Default on-disk location for the harvest database.
pub fn default_database_path() -> String {
    let base = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    let path = base.join("result-harvester").join("harvest.db");
    format!("sqlite:{}", path.display())
}
