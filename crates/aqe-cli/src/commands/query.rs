use crate::output::{OutputFormat, print_query_response};
use anyhow::{Context, Result};
use aqe_db::ConnectionPool;
use aqe_db::metadata::MetadataStore;

/// runs a SQL query through the feature-extract/optimize/plan/execute/scale pipeline
pub async fn run(
    database_url: &str,
    sql: &str,
    max_rel_error: f64,
    prefer_exact: bool,
    use_ml: bool,
    explain: bool,
    format: OutputFormat,
) -> Result<()> {
    let conn = ConnectionPool::new(database_url)
        .await
        .context("Failed to connect to database")?;

    conn.test_connection()
        .await
        .context("Failed to test database connection")?;

    MetadataStore::ensure_schema(conn.pool())
        .await
        .context("Failed to initialize metadata tables")?;

    let response = aqe_core::query(conn.pool(), sql, max_rel_error, prefer_exact, use_ml, explain)
        .await
        .context("Query failed")?;

    print_query_response(&response, &format);

    Ok(())
}
