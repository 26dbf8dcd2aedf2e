use crate::output::{OutputFormat, print_sketch_build, print_sketches};
use anyhow::{Context, Result};
use aqe_core::sketch_ops::{create_sketch, describe_sketch};
use aqe_db::ConnectionPool;
use aqe_db::metadata::MetadataStore;

/// builds a sketch over `table.column` and persists it
#[allow(clippy::too_many_arguments)]
pub async fn run_create(
    database_url: &str,
    table: &str,
    column: &str,
    sketch_type: &str,
    b: u8,
    epsilon: f64,
    delta: f64,
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

    let parameters = match sketch_type {
        "hyperloglog" => serde_json::json!({ "b": b }),
        "countmin" => serde_json::json!({ "epsilon": epsilon, "delta": delta }),
        other => anyhow::bail!("unsupported sketch type: {other}"),
    };

    let summary = create_sketch(conn.pool(), table, Some(column), sketch_type, &parameters)
        .await
        .context("Failed to build sketch")?;

    print_sketch_build(&summary, &format);

    Ok(())
}

/// lists every sketch built for `table`
pub async fn run_list(database_url: &str, table: &str, format: OutputFormat) -> Result<()> {
    let conn = ConnectionPool::new(database_url)
        .await
        .context("Failed to connect to database")?;

    conn.test_connection()
        .await
        .context("Failed to test database connection")?;

    MetadataStore::ensure_schema(conn.pool())
        .await
        .context("Failed to initialize metadata tables")?;

    let records = MetadataStore::list_sketches(conn.pool(), table)
        .await
        .context("Failed to list sketches")?;

    let descriptions: Vec<_> = records
        .iter()
        .map(describe_sketch)
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to decode stored sketch")?;

    print_sketches(&descriptions, &format);

    Ok(())
}
