//! Regex-based SQL feature extraction. No parser: the engine accepts that
//! pathological SQL (commented-out aggregates, subqueries aliased like a
//! reserved word) may be misclassified, and leans on the Planner's `exact`
//! fallback to bound the damage.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::warn;

use aqe_db::discovery::quote_identifier;
use aqe_db::error::{AqeError, AqeResult};

/// The feature vector the Planner and MLOptimizer both reason over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub table_name: String,
    pub table_size: i64,
    pub has_count: bool,
    pub has_sum: bool,
    pub has_avg: bool,
    pub has_distinct: bool,
    pub has_group_by: bool,
    pub group_by_cardinality: usize,
    pub where_complexity: usize,
    pub query_length: usize,
    pub error_tolerance: f64,
}

pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Extract a feature vector from `sql`. Fails only when no table name
    /// can be found after `FROM`; a failure to probe the table's row count
    /// is logged and downgraded to `table_size = 0` rather than propagated.
    pub async fn extract(
        pool: &SqlitePool,
        sql: &str,
        error_tolerance: f64,
    ) -> AqeResult<FeatureVector> {
        let table_name = extract_table_name(sql).ok_or_else(|| {
            AqeError::InvalidArgument("no table name found after FROM".to_string())
        })?;

        let table_size = match sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {}",
            quote_identifier(&table_name)
        ))
        .fetch_one(pool)
        .await
        {
            Ok(n) => n,
            Err(err) => {
                warn!(table = %table_name, error = %err, "failed to probe table size, defaulting to 0");
                0
            }
        };

        let sql_upper = sql.to_uppercase();
        let has_count = sql_upper.contains("COUNT");
        let has_sum = sql_upper.contains("SUM");
        let has_avg = sql_upper.contains("AVG");
        let has_distinct = sql_upper.contains("DISTINCT");
        let has_group_by = sql_upper.contains("GROUP BY");

        let group_by_cardinality = has_group_by
            .then(|| group_by_items(sql))
            .unwrap_or(0);
        let where_complexity = where_complexity(sql);

        Ok(FeatureVector {
            table_name,
            table_size,
            has_count,
            has_sum,
            has_avg,
            has_distinct,
            has_group_by,
            group_by_cardinality,
            where_complexity,
            query_length: sql.len(),
            error_tolerance,
        })
    }
}

/// Extract the first identifier after `FROM`, case-insensitively.
pub fn extract_table_name(sql: &str) -> Option<String> {
    table_regex()
        .captures(sql)
        .map(|caps| caps[1].to_string())
}

fn table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bFROM\s+([a-zA-Z_][a-zA-Z0-9_]*)").unwrap())
}

fn group_by_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)GROUP\s+BY\s+(.+?)(?:\s+HAVING|\s+ORDER|\s+LIMIT|$)").unwrap()
    })
}

fn where_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)WHERE\s+(.+?)(?:\s+GROUP|\s+ORDER|\s+LIMIT|$)").unwrap()
    })
}

fn and_or_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(AND|OR)\b").unwrap())
}

fn group_by_items(sql: &str) -> usize {
    group_by_regex()
        .captures(sql)
        .map(|caps| caps[1].split(',').count())
        .unwrap_or(0)
}

fn where_complexity(sql: &str) -> usize {
    where_regex()
        .captures(sql)
        .map(|caps| and_or_regex().find_iter(&caps[1]).count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqe_db::fixtures;
    use aqe_db::test_utils::TestDb;

    #[tokio::test]
    async fn extracts_table_and_aggregate_flags() {
        let db = TestDb::new().await.unwrap();
        fixtures::create_purchases_table(db.pool()).await.unwrap();

        let features = FeatureExtractor::extract(
            db.pool(),
            "SELECT SUM(amount) FROM purchases WHERE amount > 10 AND sku = 'x'",
            0.05,
        )
        .await
        .unwrap();

        assert_eq!(features.table_name, "purchases");
        assert_eq!(features.table_size, 500);
        assert!(features.has_sum);
        assert!(!features.has_count);
        assert!(!features.has_group_by);
        assert_eq!(features.where_complexity, 1);
    }

    #[tokio::test]
    async fn missing_table_falls_back_to_zero_size() {
        let db = TestDb::new().await.unwrap();

        let features = FeatureExtractor::extract(db.pool(), "SELECT COUNT(*) FROM ghost", 0.05)
            .await
            .unwrap();

        assert_eq!(features.table_size, 0);
        assert!(features.has_count);
    }

    #[tokio::test]
    async fn missing_from_clause_is_invalid_argument() {
        let db = TestDb::new().await.unwrap();
        let err = FeatureExtractor::extract(db.pool(), "SELECT 1", 0.05)
            .await
            .unwrap_err();
        assert!(matches!(err, AqeError::InvalidArgument(_)));
    }

    #[test]
    fn counts_group_by_columns() {
        assert_eq!(group_by_items("SELECT a FROM t GROUP BY x, y, z ORDER BY x"), 3);
        assert_eq!(group_by_items("SELECT a FROM t GROUP BY x"), 1);
        assert_eq!(group_by_items("SELECT a FROM t"), 0);
    }

    #[test]
    fn counts_where_complexity() {
        assert_eq!(
            where_complexity("SELECT a FROM t WHERE x > 1 AND y < 2 OR z = 3 GROUP BY a"),
            2
        );
        assert_eq!(where_complexity("SELECT a FROM t WHERE x > 1"), 0);
    }

    #[test]
    fn extraction_is_deterministic() {
        let sql = "SELECT COUNT(DISTINCT x) FROM orders WHERE a = 1 AND b = 2 GROUP BY c";
        assert_eq!(extract_table_name(sql), extract_table_name(sql));
        assert_eq!(group_by_items(sql), group_by_items(sql));
        assert_eq!(where_complexity(sql), where_complexity(sql));
    }
}
