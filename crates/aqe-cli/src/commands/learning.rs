use crate::output::{OutputFormat, print_learning_stats};
use anyhow::{Context, Result};
use aqe_db::ConnectionPool;
use aqe_db::metadata::MetadataStore;

/// shows aggregate learning-table statistics: per-strategy speedup/error
/// averages over the last 30 days, plus the all-time query count
pub async fn run(database_url: &str, format: OutputFormat) -> Result<()> {
    let conn = ConnectionPool::new(database_url)
        .await
        .context("Failed to connect to database")?;

    conn.test_connection()
        .await
        .context("Failed to test database connection")?;

    MetadataStore::ensure_schema(conn.pool())
        .await
        .context("Failed to initialize metadata tables")?;

    let (per_strategy, total) = MetadataStore::learning_stats(conn.pool())
        .await
        .context("Failed to load learning stats")?;

    print_learning_stats(&per_strategy, total, &format);

    Ok(())
}
