//! Local queryable store
//!
//! The load stage writes `boardgames.db` (SQLite) in the run's output folder.

pub mod diagnostics;
pub mod loader;

pub use diagnostics::{duplicate_matches, log_diagnostics, method_breakdown, DuplicateMatch};
pub use loader::load_store;

use crate::error::IngestResult;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (or create) the store
pub async fn init_database_pool(db_path: &Path) -> IngestResult<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    Ok(pool)
}
