use sqlx::SqlitePool;

use crate::error::AqeResult;
use crate::types::{
    NewPerformanceRecord, PerformanceRecord, SampleDescriptor, SketchRecord, StratumRecord,
    TableStats,
};

/// Owns the `aqe_*` metadata tables. Passed around as an explicit
/// dependency (a pool reference) rather than kept behind a global, so
/// every write goes through one place and is easy to serialize.
#[derive(Debug, Clone)]
pub struct MetadataStore;

impl MetadataStore {
    /// Create every `aqe_*` table and index if they don't already exist.
    /// Safe to call on every startup.
    pub async fn ensure_schema(pool: &SqlitePool) -> AqeResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aqe_table_stats (
                table_name TEXT PRIMARY KEY,
                row_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (CURRENT_TIMESTAMP)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aqe_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                sample_table TEXT NOT NULL,
                sample_fraction REAL NOT NULL,
                strata_column TEXT,
                created_at TEXT NOT NULL DEFAULT (CURRENT_TIMESTAMP)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aqe_strata_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sample_table TEXT NOT NULL,
                strata_key TEXT NOT NULL,
                strata_value TEXT NOT NULL,
                pop_size INTEGER NOT NULL,
                sample_size INTEGER NOT NULL,
                fraction REAL NOT NULL,
                weight REAL NOT NULL,
                variance REAL NOT NULL,
                created_at TEXT NOT NULL DEFAULT (CURRENT_TIMESTAMP)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aqe_sketches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL DEFAULT '',
                sketch_type TEXT NOT NULL,
                sketch_data BLOB NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (CURRENT_TIMESTAMP),
                UNIQUE(table_name, column_name, sketch_type)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aqe_query_performance_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_pattern TEXT NOT NULL,
                table_size INTEGER NOT NULL,
                strategy TEXT NOT NULL,
                predicted_speedup REAL NOT NULL,
                predicted_error REAL NOT NULL,
                actual_speedup REAL NOT NULL,
                actual_error REAL NOT NULL,
                execution_time_ms REAL NOT NULL,
                error_tolerance REAL NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (CURRENT_TIMESTAMP),
                features TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_query_pattern ON aqe_query_performance_history(query_pattern)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_table_size ON aqe_query_performance_history(table_size)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Insert or update a table's row count.
    pub async fn upsert_table_stats(pool: &SqlitePool, table: &str, row_count: i64) -> AqeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO aqe_table_stats(table_name, row_count, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(table_name) DO UPDATE SET
                row_count = excluded.row_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(table)
        .bind(row_count)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn get_table_stats(pool: &SqlitePool, table: &str) -> AqeResult<Option<TableStats>> {
        let stats = sqlx::query_as::<_, TableStats>(
            "SELECT table_name, row_count, updated_at FROM aqe_table_stats WHERE table_name = ?",
        )
        .bind(table)
        .fetch_optional(pool)
        .await?;

        Ok(stats)
    }

    /// Record a sample descriptor. Not upserted by primary key: retries
    /// append a duplicate row rather than failing, per the engine's
    /// idempotent-on-retry contract for sample creation.
    pub async fn insert_sample_descriptor(
        pool: &SqlitePool,
        base_table: &str,
        sample_table: &str,
        fraction: f64,
        strata_column: Option<&str>,
    ) -> AqeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO aqe_samples(table_name, sample_table, sample_fraction, strata_column, created_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(base_table)
        .bind(sample_table)
        .bind(fraction)
        .bind(strata_column)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// All sample descriptors for a base table, ordered by fraction
    /// ascending (the Planner wants the cheapest one that still meets
    /// the error budget).
    pub async fn list_samples_for_table(
        pool: &SqlitePool,
        base_table: &str,
    ) -> AqeResult<Vec<SampleDescriptor>> {
        let rows = sqlx::query_as::<_, SampleDescriptor>(
            r#"
            SELECT id, table_name as base_table, sample_table, sample_fraction as fraction,
                   strata_column, created_at
            FROM aqe_samples
            WHERE table_name = ?
            ORDER BY sample_fraction ASC
            "#,
        )
        .bind(base_table)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn insert_stratum_records(
        pool: &SqlitePool,
        sample_table: &str,
        records: &[StratumRecord],
    ) -> AqeResult<()> {
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO aqe_strata_info(
                    sample_table, strata_key, strata_value, pop_size, sample_size, fraction, weight, variance, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
                "#,
            )
            .bind(sample_table)
            .bind(&record.strata_key)
            .bind(&record.strata_value)
            .bind(record.pop_size)
            .bind(record.sample_size)
            .bind(record.fraction)
            .bind(record.weight)
            .bind(record.variance)
            .execute(pool)
            .await?;
        }

        Ok(())
    }

    pub async fn get_strata_for_sample(
        pool: &SqlitePool,
        sample_table: &str,
    ) -> AqeResult<Vec<StratumRecord>> {
        let rows = sqlx::query_as::<_, StratumRecord>(
            r#"
            SELECT sample_table, strata_key, strata_value, pop_size, sample_size, fraction, weight, variance
            FROM aqe_strata_info
            WHERE sample_table = ?
            "#,
        )
        .bind(sample_table)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Store or replace a sketch. `column` is normalized to `""` when absent
    /// so the `(table, column, sketch_type)` uniqueness key actually dedupes.
    pub async fn upsert_sketch(
        pool: &SqlitePool,
        table: &str,
        column: Option<&str>,
        sketch_type: &str,
        data: &[u8],
        parameters: &str,
    ) -> AqeResult<()> {
        let column = column.unwrap_or("");

        sqlx::query(
            r#"
            INSERT INTO aqe_sketches(table_name, column_name, sketch_type, sketch_data, parameters, created_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(table_name, column_name, sketch_type) DO UPDATE SET
                sketch_data = excluded.sketch_data,
                parameters = excluded.parameters,
                created_at = excluded.created_at
            "#,
        )
        .bind(table)
        .bind(column)
        .bind(sketch_type)
        .bind(data)
        .bind(parameters)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn get_sketch(
        pool: &SqlitePool,
        table: &str,
        column: Option<&str>,
        sketch_type: &str,
    ) -> AqeResult<Option<SketchRecord>> {
        let column = column.unwrap_or("");

        let row = sqlx::query_as::<_, SketchRecord>(
            r#"
            SELECT table_name, column_name, sketch_type, sketch_data, parameters, created_at
            FROM aqe_sketches
            WHERE table_name = ? AND column_name = ? AND sketch_type = ?
            "#,
        )
        .bind(table)
        .bind(column)
        .bind(sketch_type)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    pub async fn list_sketches(pool: &SqlitePool, table: &str) -> AqeResult<Vec<SketchRecord>> {
        let rows = sqlx::query_as::<_, SketchRecord>(
            r#"
            SELECT table_name, column_name, sketch_type, sketch_data, parameters, created_at
            FROM aqe_sketches
            WHERE table_name = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(table)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn insert_performance_record(
        pool: &SqlitePool,
        record: &NewPerformanceRecord,
    ) -> AqeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO aqe_query_performance_history(
                query_pattern, table_size, strategy, predicted_speedup, predicted_error,
                actual_speedup, actual_error, execution_time_ms, error_tolerance, timestamp, features
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP, ?)
            "#,
        )
        .bind(&record.query_pattern)
        .bind(record.table_size)
        .bind(&record.strategy)
        .bind(record.predicted_speedup)
        .bind(record.predicted_error)
        .bind(record.actual_speedup)
        .bind(record.actual_error)
        .bind(record.execution_time_ms)
        .bind(record.error_tolerance)
        .bind(&record.features)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Newest `limit` rows whose `table_size` and `error_tolerance` fall
    /// within `[0.5x, 1.5x]` of the query's own values. Feature
    /// compatibility (same GROUP BY / DISTINCT shape) is filtered by the
    /// caller, not here, since it needs to inspect `features` as JSON.
    pub async fn get_performance_history(
        pool: &SqlitePool,
        table_size: i64,
        error_tolerance: f64,
        limit: i64,
    ) -> AqeResult<Vec<PerformanceRecord>> {
        let size_lo = (table_size as f64 * 0.5).floor() as i64;
        let size_hi = (table_size as f64 * 1.5).ceil() as i64;
        let err_lo = error_tolerance * 0.5;
        let err_hi = error_tolerance * 1.5;

        let rows = sqlx::query_as::<_, PerformanceRecord>(
            r#"
            SELECT id, query_pattern, table_size, strategy, predicted_speedup, predicted_error,
                   actual_speedup, actual_error, execution_time_ms, error_tolerance, timestamp, features
            FROM aqe_query_performance_history
            WHERE table_size BETWEEN ? AND ?
              AND error_tolerance BETWEEN ? AND ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(size_lo)
        .bind(size_hi)
        .bind(err_lo)
        .bind(err_hi)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Per-strategy aggregate stats over the last 30 days, plus the
    /// all-time total query count.
    pub async fn learning_stats(pool: &SqlitePool) -> AqeResult<(Vec<(String, i64, f64, f64)>, i64)> {
        let per_strategy: Vec<(String, i64, f64, f64)> = sqlx::query_as(
            r#"
            SELECT strategy, COUNT(*) as query_count,
                   AVG(actual_speedup) as avg_speedup, AVG(actual_error) as avg_error
            FROM aqe_query_performance_history
            WHERE timestamp > datetime('now', '-30 days')
            GROUP BY strategy
            "#,
        )
        .fetch_all(pool)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM aqe_query_performance_history")
                .fetch_one(pool)
                .await?;

        Ok((per_strategy, total))
    }
}
