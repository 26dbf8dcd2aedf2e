use sqlx::SqlitePool;

use crate::error::AqeResult;

/// List every user-created table (SQLite's internal `sqlite_%` tables and
/// the engine's own `aqe_%` metadata tables are excluded).
pub async fn list_tables(pool: &SqlitePool) -> AqeResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT name FROM sqlite_master
        WHERE type = 'table'
          AND name NOT LIKE 'sqlite_%'
          AND name NOT LIKE 'aqe\_%' ESCAPE '\'
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Exact row count for a table. Slow on large tables by design: callers
/// that already have a cached `aqe_table_stats` row should prefer that.
pub async fn get_row_count(pool: &SqlitePool, table: &str) -> AqeResult<i64> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {}",
        quote_identifier(table)
    ))
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// List column names for a table, in declaration order.
pub async fn list_columns(pool: &SqlitePool, table: &str) -> AqeResult<Vec<String>> {
    let rows: Vec<(i64, String, String, i64, Option<String>, i64)> =
        sqlx::query_as(&format!("PRAGMA table_info({})", quote_identifier(table)))
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(_, name, _, _, _, _)| name).collect())
}

/// Quote a SQLite identifier (table/column name) to prevent SQL injection.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Whether a table with this exact name exists in the database. Used by
/// the Planner and MLOptimizer to decide between a pre-built sample table
/// and an inline-sampled rewrite.
pub async fn table_exists(pool: &SqlitePool, name: &str) -> AqeResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_identifier_escapes_double_quotes() {
        assert_eq!(quote_identifier("orders"), "\"orders\"");
        assert_eq!(quote_identifier("weird\"name"), "\"weird\"\"name\"");
    }

    #[tokio::test]
    async fn table_exists_reflects_actual_tables() {
        let db = crate::test_utils::TestDb::new().await.unwrap();
        assert!(!table_exists(db.pool(), "nope").await.unwrap());

        sqlx::query("CREATE TABLE widgets (id INTEGER)")
            .execute(db.pool())
            .await
            .unwrap();
        assert!(table_exists(db.pool(), "widgets").await.unwrap());
    }
}
