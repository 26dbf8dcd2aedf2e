use crate::output::{OutputFormat, print_tables};
use anyhow::{Context, Result};
use aqe_db::ConnectionPool;
use aqe_db::discovery::list_tables;
use aqe_db::metadata::MetadataStore;

/// runs the discover command to list tables the engine can query or sample
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

    let tables = list_tables(conn.pool())
        .await
        .context("Failed to list tables")?;

    print_tables(&tables, &format);

    Ok(())
}
