use crate::output::{OutputFormat, print_stratified_sample, print_uniform_sample};
use anyhow::{Context, Result};
use aqe_db::ConnectionPool;
use aqe_db::Sampler;
use aqe_db::metadata::MetadataStore;

/// creates a uniform random sample of `table` at `fraction`
pub async fn run_uniform(
    database_url: &str,
    table: &str,
    fraction: f64,
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

    let (sample_table, row_count) = Sampler
        .create_uniform_sample(conn.pool(), table, fraction)
        .await
        .context("Failed to create uniform sample")?;

    print_uniform_sample(&sample_table, row_count, &format);

    Ok(())
}

/// creates a stratified sample of `table`, split over `strata_column`,
/// with Neyman-optimal allocation when `variance_column` is given
pub async fn run_stratified(
    database_url: &str,
    table: &str,
    strata_column: &str,
    total_fraction: f64,
    variance_column: Option<&str>,
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

    let (sample_table, strata) = Sampler
        .create_stratified_sample(conn.pool(), table, strata_column, total_fraction, variance_column)
        .await
        .context("Failed to create stratified sample")?;

    print_stratified_sample(&sample_table, &strata, &format);

    Ok(())
}
