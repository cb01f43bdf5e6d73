//! Persistence, configuration and logging plumbing.

pub mod config;
pub mod database_connection;
pub mod logging;
pub mod repository;

pub use config::HarvesterConfig;
pub use database_connection::DatabaseConnection;
pub use logging::init_logging;
pub use repository::{BatchOutcome, HarvestRepository};
