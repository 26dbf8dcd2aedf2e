//! Two-phase strategy selection: a deterministic decision tree over the
//! query's feature vector, then an optional override from historical
//! performance when a feature-compatible precedent beats the base rule.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use aqe_db::discovery::table_exists;
use aqe_db::error::AqeResult;
use aqe_db::metadata::MetadataStore;
use aqe_db::naming::uniform_sample_table_name;
use aqe_db::types::{NewPerformanceRecord, PerformanceRecord};

use crate::feature_extractor::{FeatureExtractor, FeatureVector};
use crate::sql_rewrite::{replace_whole_identifier, rewrite_from_clause};

pub const DEFAULT_LEARNING_HISTORY_LIMIT: i64 = 20;

/// Which approximation strategy a query should run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Exact,
    Sample,
    Stratified,
    Sketch,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Exact => "exact",
            Strategy::Sample => "sample",
            Strategy::Stratified => "stratified",
            Strategy::Sketch => "sketch",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Strategy::Exact),
            "sample" => Some(Strategy::Sample),
            "stratified" => Some(Strategy::Stratified),
            "sketch" => Some(Strategy::Sketch),
            _ => None,
        }
    }
}

/// The chosen strategy plus everything needed to execute and later score it.
#[derive(Debug, Clone)]
pub struct Optimization {
    pub strategy: Strategy,
    pub rewritten_sql: String,
    /// Structured fraction behind a ROWID-modulo rewrite (`sample` and the
    /// `sketch` proxy strategy). `None` for `exact` and `stratified`, which
    /// delegate to a precomputed sample instead of rewriting this SQL.
    pub sample_fraction: Option<f64>,
    pub predicted_speedup: f64,
    pub predicted_error: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub features: FeatureVector,
    pub used_learning_override: bool,
}

pub struct MlOptimizer;

impl MlOptimizer {
    /// Choose a strategy for `sql` using the default learning-history
    /// window, optionally overridden by history, and return the rewritten
    /// SQL to run plus the reasoning behind it.
    pub async fn optimize_query(
        pool: &SqlitePool,
        sql: &str,
        error_tolerance: f64,
    ) -> AqeResult<Optimization> {
        Self::optimize_query_with_limit(pool, sql, error_tolerance, DEFAULT_LEARNING_HISTORY_LIMIT)
            .await
    }

    pub async fn optimize_query_with_limit(
        pool: &SqlitePool,
        sql: &str,
        error_tolerance: f64,
        learning_history_limit: i64,
    ) -> AqeResult<Optimization> {
        let features = FeatureExtractor::extract(pool, sql, error_tolerance).await?;

        let (base_strategy, base_speedup, base_error, base_confidence, base_reason) =
            base_rule(&features);

        let history = MetadataStore::get_performance_history(
            pool,
            features.table_size,
            error_tolerance,
            learning_history_limit,
        )
        .await?;

        let override_choice = learning_override(&features, &history, error_tolerance);

        let (strategy, predicted_speedup, predicted_error, confidence, reasoning, used_override) =
            match override_choice {
                Some((strategy, speedup, error, confidence, reason)) => {
                    (strategy, speedup, error, confidence, reason, true)
                }
                None => (
                    base_strategy,
                    base_speedup,
                    base_error,
                    base_confidence,
                    base_reason,
                    false,
                ),
            };

        debug!(
            strategy = strategy.as_str(),
            used_override, "ml optimizer selected strategy"
        );

        let (rewritten_sql, sample_fraction) =
            apply_transformation(pool, sql, &features, strategy).await;

        Ok(Optimization {
            strategy,
            rewritten_sql,
            sample_fraction,
            predicted_speedup,
            predicted_error,
            confidence,
            reasoning,
            features,
            used_learning_override: used_override,
        })
    }

    /// Persist how a plan actually performed, for future calls to learn from.
    pub async fn record_outcome(
        pool: &SqlitePool,
        optimization: &Optimization,
        actual_speedup: f64,
        actual_error: f64,
        execution_time_ms: f64,
        error_tolerance: f64,
    ) -> AqeResult<()> {
        let record = NewPerformanceRecord {
            query_pattern: query_pattern(&optimization.features),
            table_size: optimization.features.table_size,
            strategy: optimization.strategy.as_str().to_string(),
            predicted_speedup: optimization.predicted_speedup,
            predicted_error: optimization.predicted_error,
            actual_speedup,
            actual_error,
            execution_time_ms,
            error_tolerance,
            features: serde_json::to_string(&optimization.features).unwrap_or_default(),
        };

        MetadataStore::insert_performance_record(pool, &record).await
    }
}

/// A coarse signature grouping queries with the same aggregate/grouping
/// shape, used to look up past performance without matching literal SQL.
fn query_pattern(features: &FeatureVector) -> String {
    format!(
        "{}:count={}:sum={}:avg={}:distinct={}:group={}",
        features.table_name,
        features.has_count,
        features.has_sum,
        features.has_avg,
        features.has_distinct,
        features.has_group_by
    )
}

type BaseRuleOutcome = (Strategy, f64, f64, f64, String);

/// Deterministic decision tree over the feature vector. Branches are
/// checked in order; the first match wins.
fn base_rule(f: &FeatureVector) -> BaseRuleOutcome {
    if f.table_size <= 1000 {
        return (
            Strategy::Exact,
            1.0,
            0.0,
            0.95,
            format!("table has only {} rows, not worth approximating", f.table_size),
        );
    }

    if f.has_distinct && f.has_count && f.error_tolerance > 0.001 {
        let (speedup, error) = sketch_proxy_estimate(f.table_size);
        return (
            Strategy::Sketch,
            speedup,
            error,
            0.90,
            "COUNT DISTINCT fits a cardinality sketch".to_string(),
        );
    }

    if f.has_group_by && f.error_tolerance > 0.001 {
        if f.table_size > 10_000 && f.group_by_cardinality > 1 {
            return (
                Strategy::Stratified,
                8.0,
                0.02,
                0.85,
                format!(
                    "GROUP BY over {} groups on a large table favors a stratified sample",
                    f.group_by_cardinality
                ),
            );
        }
        let (speedup, error) = sketch_proxy_estimate(f.table_size);
        return (
            Strategy::Sketch,
            speedup,
            error,
            0.80,
            "GROUP BY with low cardinality, approximating with a sketch proxy".to_string(),
        );
    }

    if f.table_size > 5000 && f.error_tolerance > 0.001 && (f.has_count || f.has_sum || f.has_avg) {
        let (speedup, error) = sample_estimate(f.table_size, f.error_tolerance);
        return (
            Strategy::Sample,
            speedup,
            error,
            0.85,
            format!("aggregate query over {} rows", f.table_size),
        );
    }

    if f.table_size > 1000 && f.error_tolerance > 0.001 && (f.has_count || f.has_sum) {
        let (speedup, error) = sample_estimate(f.table_size, f.error_tolerance);
        return (
            Strategy::Sample,
            speedup,
            error,
            0.75,
            format!("moderate-size aggregate over {} rows", f.table_size),
        );
    }

    (
        Strategy::Exact,
        1.0,
        0.0,
        0.60,
        "no strategy rule matched, exact execution is safest".to_string(),
    )
}

/// The sampling fraction the base rule picks for a plain `sample` strategy:
/// coarser on bigger tables, halved once the error budget is generous.
fn sample_fraction_for(table_size: i64, error_tolerance: f64) -> f64 {
    let mut fraction = if table_size > 100_000 {
        0.01
    } else if table_size > 50_000 {
        0.02
    } else {
        0.05
    };
    if error_tolerance > 0.1 {
        fraction /= 2.0;
    }
    fraction
}

fn sample_estimate(table_size: i64, error_tolerance: f64) -> (f64, f64) {
    let fraction = sample_fraction_for(table_size, error_tolerance);
    let n = ((fraction * table_size as f64) as i64).max(100) as f64;
    let error = (1.0 / n.sqrt()).clamp(0.01, 0.50);
    (1.0 / fraction, error)
}

/// The sketch strategy here is a ROWID-modulo proxy sample at a fixed 30%
/// fraction, not the dedicated HLL/CMS data structures (those are built
/// explicitly via `create_sketch` and served directly by the executor).
fn sketch_proxy_estimate(table_size: i64) -> (f64, f64) {
    const PROXY_FRACTION: f64 = 0.3;
    let n = ((PROXY_FRACTION * table_size as f64) as i64).max(100) as f64;
    let error = (1.0 / n.sqrt()).clamp(0.02, 0.30);
    (1.0 / PROXY_FRACTION, error)
}

type OverrideOutcome = (Strategy, f64, f64, f64, String);

/// Group feature-compatible history by strategy, score each group, and
/// replace the base rule only if the winning group clears the error bar.
fn learning_override(
    features: &FeatureVector,
    history: &[PerformanceRecord],
    error_tolerance: f64,
) -> Option<OverrideOutcome> {
    let mut groups: HashMap<Strategy, Vec<&PerformanceRecord>> = HashMap::new();

    for record in history {
        if !feature_compatible(features, record) {
            continue;
        }
        let Some(strategy) = Strategy::parse(&record.strategy) else {
            continue;
        };
        groups.entry(strategy).or_default().push(record);
    }

    let mut best: Option<(Strategy, f64, f64, f64, usize)> = None;

    for (strategy, records) in &groups {
        let n = records.len();
        let avg_speedup = records.iter().map(|r| r.actual_speedup).sum::<f64>() / n as f64;
        let avg_error = records.iter().map(|r| r.actual_error).sum::<f64>() / n as f64;
        let score = 0.6 * avg_speedup - 0.4 * avg_error;

        if best.as_ref().map(|(_, _, _, s, _)| score > *s).unwrap_or(true) {
            best = Some((*strategy, avg_speedup, avg_error, score, n));
        }
    }

    let (strategy, avg_speedup, avg_error, _score, n) = best?;
    if avg_error > 1.2 * error_tolerance {
        return None;
    }

    let confidence = (0.6 + 0.03 * n as f64).min(0.95);
    let reasoning = format!(
        "learned from {} feature-compatible run(s): {:.1}x avg speedup at {:.4} avg error",
        n, avg_speedup, avg_error
    );

    Some((strategy, avg_speedup, avg_error, confidence, reasoning))
}

/// Whether a past run's feature shape matches this query closely enough to
/// trust its recorded performance. The source this was distilled from
/// windowed purely on table size and error tolerance and ignored whether
/// the queries were shaped alike at all, so a `COUNT DISTINCT` run could
/// override the plan for a plain `SUM`. This additionally requires the
/// same aggregate and GROUP BY shape.
fn feature_compatible(features: &FeatureVector, record: &PerformanceRecord) -> bool {
    let Ok(past): Result<FeatureVector, _> = serde_json::from_str(&record.features) else {
        return false;
    };

    past.has_group_by == features.has_group_by && past.has_distinct == features.has_distinct
}

/// Rewrite `sql` to carry out the chosen strategy. `exact` and `stratified`
/// leave the SQL untouched (stratified delegates to a precomputed sample
/// table; exact needs no rewrite). `sample` and `sketch` append a
/// ROWID-modulo predicate to the `FROM` clause, or substitute a prebuilt
/// `{T}__sample_{F}` table by name when one already exists at that fraction.
async fn apply_transformation(
    pool: &SqlitePool,
    sql: &str,
    features: &FeatureVector,
    strategy: Strategy,
) -> (String, Option<f64>) {
    let fraction = match strategy {
        Strategy::Sample => Some(sample_fraction_for(features.table_size, features.error_tolerance)),
        Strategy::Sketch => Some(0.3),
        Strategy::Exact | Strategy::Stratified => None,
    };

    let Some(fraction) = fraction else {
        return (sql.to_string(), None);
    };

    let prebuilt = uniform_sample_table_name(&features.table_name, fraction);
    if table_exists(pool, &prebuilt).await.unwrap_or(false) {
        return (
            replace_whole_identifier(sql, &features.table_name, &prebuilt),
            Some(fraction),
        );
    }

    let modulo = ((1.0 / fraction) as i64).max(1);
    let predicate = format!(
        "FROM {} WHERE (ROWID % {}) = 0",
        features.table_name, modulo
    );
    let rewritten = rewrite_from_clause(sql, &features.table_name, &predicate);
    (rewritten, Some(fraction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqe_db::fixtures;
    use aqe_db::test_utils::TestDb;

    #[tokio::test]
    async fn small_table_stays_exact() {
        let db = TestDb::new().await.unwrap();
        fixtures::create_purchases_table(db.pool()).await.unwrap();

        let opt = MlOptimizer::optimize_query(db.pool(), "SELECT SUM(amount) FROM purchases", 0.05)
            .await
            .unwrap();

        assert_eq!(opt.strategy, Strategy::Exact);
        assert!(!opt.used_learning_override);
        assert_eq!(opt.rewritten_sql, "SELECT SUM(amount) FROM purchases");
    }

    #[test]
    fn count_distinct_uses_sketch_proxy() {
        let features = FeatureVector {
            table_name: "big".to_string(),
            table_size: 500_000,
            has_count: true,
            has_sum: false,
            has_avg: false,
            has_distinct: true,
            has_group_by: false,
            group_by_cardinality: 0,
            where_complexity: 0,
            query_length: 40,
            error_tolerance: 0.05,
        };
        let (strategy, speedup, error, confidence, _) = base_rule(&features);
        assert_eq!(strategy, Strategy::Sketch);
        assert!(speedup > 1.0);
        assert!(error > 0.0);
        assert_eq!(confidence, 0.90);
    }

    #[test]
    fn high_cardinality_group_by_prefers_stratified() {
        let features = FeatureVector {
            table_name: "orders".to_string(),
            table_size: 50_000,
            has_count: true,
            has_sum: false,
            has_avg: false,
            has_distinct: false,
            has_group_by: true,
            group_by_cardinality: 5,
            where_complexity: 0,
            query_length: 40,
            error_tolerance: 0.05,
        };
        let (strategy, speedup, error, _, _) = base_rule(&features);
        assert_eq!(strategy, Strategy::Stratified);
        assert_eq!(speedup, 8.0);
        assert_eq!(error, 0.02);
    }

    #[test]
    fn low_cardinality_group_by_falls_back_to_sketch() {
        let features = FeatureVector {
            table_name: "orders".to_string(),
            table_size: 50_000,
            has_count: true,
            has_sum: false,
            has_avg: false,
            has_distinct: false,
            has_group_by: true,
            group_by_cardinality: 1,
            where_complexity: 0,
            query_length: 40,
            error_tolerance: 0.05,
        };
        let (strategy, ..) = base_rule(&features);
        assert_eq!(strategy, Strategy::Sketch);
    }

    #[test]
    fn large_aggregate_table_samples() {
        let features = FeatureVector {
            table_name: "huge".to_string(),
            table_size: 200_000,
            has_count: false,
            has_sum: true,
            has_avg: false,
            has_distinct: false,
            has_group_by: false,
            group_by_cardinality: 0,
            where_complexity: 0,
            query_length: 40,
            error_tolerance: 0.05,
        };

        let (strategy, speedup, error, confidence, _) = base_rule(&features);
        assert_eq!(strategy, Strategy::Sample);
        assert_eq!(speedup, 100.0);
        assert!(error > 0.0);
        assert_eq!(confidence, 0.85);
    }

    #[tokio::test]
    async fn sample_rewrite_uses_rowid_modulo_when_no_prebuilt_sample() {
        let db = TestDb::new().await.unwrap();
        sqlx::query("CREATE TABLE huge (id INTEGER, amount REAL)")
            .execute(db.pool())
            .await
            .unwrap();

        let features = FeatureVector {
            table_name: "huge".to_string(),
            table_size: 200_000,
            has_count: false,
            has_sum: true,
            has_avg: false,
            has_distinct: false,
            has_group_by: false,
            group_by_cardinality: 0,
            where_complexity: 0,
            query_length: 40,
            error_tolerance: 0.05,
        };

        let (rewritten, fraction) = apply_transformation(
            db.pool(),
            "SELECT SUM(amount) FROM huge",
            &features,
            Strategy::Sample,
        )
        .await;

        assert_eq!(fraction, Some(0.01));
        assert_eq!(
            rewritten,
            "SELECT SUM(amount) FROM huge WHERE (ROWID % 100) = 0"
        );
    }

    #[tokio::test]
    async fn sample_rewrite_substitutes_prebuilt_sample_table() {
        let db = TestDb::new().await.unwrap();
        sqlx::query("CREATE TABLE huge (id INTEGER, amount REAL)")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("CREATE TABLE huge__sample_0_01 (id INTEGER, amount REAL)")
            .execute(db.pool())
            .await
            .unwrap();

        let features = FeatureVector {
            table_name: "huge".to_string(),
            table_size: 200_000,
            has_count: false,
            has_sum: true,
            has_avg: false,
            has_distinct: false,
            has_group_by: false,
            group_by_cardinality: 0,
            where_complexity: 0,
            query_length: 40,
            error_tolerance: 0.05,
        };

        let (rewritten, fraction) = apply_transformation(
            db.pool(),
            "SELECT SUM(amount) FROM huge",
            &features,
            Strategy::Sample,
        )
        .await;

        assert_eq!(fraction, Some(0.01));
        assert_eq!(rewritten, "SELECT SUM(amount) FROM huge__sample_0_01");
    }

    #[test]
    fn feature_incompatible_history_is_ignored() {
        let features = FeatureVector {
            table_name: "t".to_string(),
            table_size: 200_000,
            has_count: false,
            has_sum: true,
            has_avg: false,
            has_distinct: false,
            has_group_by: false,
            group_by_cardinality: 0,
            where_complexity: 0,
            query_length: 10,
            error_tolerance: 0.05,
        };
        let mut past = features.clone();
        past.has_distinct = true;

        let record = PerformanceRecord {
            id: 1,
            query_pattern: "t".to_string(),
            table_size: 200_000,
            strategy: "sketch".to_string(),
            predicted_speedup: 50.0,
            predicted_error: 0.02,
            actual_speedup: 50.0,
            actual_error: 0.02,
            execution_time_ms: 5.0,
            error_tolerance: 0.05,
            timestamp: "now".to_string(),
            features: serde_json::to_string(&past).unwrap(),
        };

        assert!(learning_override(&features, &[record], 0.05).is_none());
    }

    #[test]
    fn compatible_history_overrides_base_rule_when_error_within_bound() {
        let features = FeatureVector {
            table_name: "events".to_string(),
            table_size: 500_000,
            has_count: true,
            has_sum: false,
            has_avg: false,
            has_distinct: true,
            has_group_by: false,
            group_by_cardinality: 0,
            where_complexity: 0,
            query_length: 10,
            error_tolerance: 0.05,
        };

        let mut records = Vec::new();
        for _ in 0..15 {
            records.push(PerformanceRecord {
                id: 1,
                query_pattern: "events".to_string(),
                table_size: 500_000,
                strategy: "sketch".to_string(),
                predicted_speedup: 5.0,
                predicted_error: 0.02,
                actual_speedup: 5.0,
                actual_error: 0.02,
                execution_time_ms: 5.0,
                error_tolerance: 0.05,
                timestamp: "now".to_string(),
                features: serde_json::to_string(&features).unwrap(),
            });
        }

        let (strategy, _, avg_error, confidence, _) =
            learning_override(&features, &records, 0.05).unwrap();
        assert_eq!(strategy, Strategy::Sketch);
        assert!(avg_error <= 0.05 * 1.2);
        assert!(confidence >= 0.85);
    }

    #[test]
    fn query_pattern_is_deterministic() {
        let features = FeatureVector {
            table_name: "orders".to_string(),
            table_size: 1,
            has_count: true,
            has_sum: false,
            has_avg: false,
            has_distinct: false,
            has_group_by: true,
            group_by_cardinality: 2,
            where_complexity: 0,
            query_length: 1,
            error_tolerance: 0.05,
        };
        assert_eq!(query_pattern(&features), query_pattern(&features));
    }
}
