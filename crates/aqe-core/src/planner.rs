//! Cost-based planner: chooses between exact execution and a pre-built
//! sample, validates the choice against the caller's error budget, and
//! falls back to `exact` whenever anything is ambiguous.

use std::sync::OnceLock;

use regex::Regex;
use sqlx::SqlitePool;
use tracing::debug;

use aqe_db::discovery::table_exists;
use aqe_db::metadata::MetadataStore;
use aqe_db::naming::parse_sample_table_name;

use crate::feature_extractor::extract_table_name;
use crate::sql_rewrite::replace_whole_identifier;

const C_SCAN: f64 = 1.0;
const C_HASH: f64 = 2.0;
/// Reserved for when the planner gains a direct sketch candidate; the
/// sketch strategy is currently only reached via the MLOptimizer, which
/// rewrites SQL ahead of the planner rather than being planned here.
#[allow(dead_code)]
const C_SKETCH: f64 = 10.0;
const C_SAMPLE_SETUP: f64 = 5.0;

/// Which of the four strategies a `Plan` commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanType {
    Exact,
    Sample,
    Stratified,
    Sketch,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Exact => "exact",
            PlanType::Sample => "sample",
            PlanType::Stratified => "stratified",
            PlanType::Sketch => "sketch",
        }
    }
}

/// An execution plan: what to run, and why.
#[derive(Debug, Clone)]
pub struct Plan {
    pub plan_type: PlanType,
    pub rewritten_sql: String,
    pub original_sql: String,
    pub table: Option<String>,
    pub sample_table: Option<String>,
    pub sample_fraction: Option<f64>,
    pub estimated_cost: f64,
    pub estimated_error: f64,
    pub reason: String,
}

impl Plan {
    fn exact(sql: &str, table: Option<String>, reason: &str) -> Self {
        Self {
            plan_type: PlanType::Exact,
            rewritten_sql: sql.to_string(),
            original_sql: sql.to_string(),
            table,
            sample_table: None,
            sample_fraction: None,
            estimated_cost: 0.0,
            estimated_error: 0.0,
            reason: reason.to_string(),
        }
    }
}

pub struct Planner;

impl Planner {
    /// Plan `sql` against the backing store, respecting `max_rel_error`
    /// and an explicit `prefer_exact` override. Never fails: every
    /// ambiguity (no table, no stats, no sample) degrades to `exact`.
    pub async fn plan(pool: &SqlitePool, sql: &str, max_rel_error: f64, prefer_exact: bool) -> Plan {
        let Some(table) = extract_table_name(sql) else {
            return Plan::exact(sql, None, "no table found");
        };

        if let Some(sample_ref) = parse_sample_table_name(&table) {
            let plan_type = if sample_ref.strata_column.is_some() {
                PlanType::Stratified
            } else {
                PlanType::Sample
            };
            return Plan {
                plan_type,
                rewritten_sql: sql.to_string(),
                original_sql: sql.to_string(),
                table: Some(sample_ref.base_table),
                sample_table: Some(table.clone()),
                sample_fraction: Some(sample_ref.fraction),
                estimated_cost: 0.0,
                estimated_error: 0.0,
                reason: format!(
                    "direct query on sample table (fraction: {:.4})",
                    sample_ref.fraction
                ),
            };
        }

        if prefer_exact {
            return Plan::exact(sql, Some(table), "user prefers exact");
        }

        let stats = match MetadataStore::get_table_stats(pool, &table).await {
            Ok(Some(stats)) => stats,
            _ => return Plan::exact(sql, Some(table), "no table stats available"),
        };

        let has_group_by = group_by_regex().is_match(sql);
        let row_count = stats.row_count;

        let mut candidates = vec![exact_candidate(sql, &table, row_count, has_group_by)];

        if let Some(sample_candidate) =
            sample_candidate(pool, sql, &table, row_count, max_rel_error).await
        {
            candidates.push(sample_candidate);
        }

        let best = candidates
            .iter()
            .filter(|p| p.estimated_error <= max_rel_error)
            .min_by(|a, b| a.estimated_cost.partial_cmp(&b.estimated_cost).unwrap())
            .cloned();

        match best {
            Some(plan) => {
                debug!(plan_type = plan.plan_type.as_str(), cost = plan.estimated_cost, "planner selected strategy");
                plan
            }
            None => candidates.into_iter().next().unwrap(),
        }
    }
}

fn exact_candidate(sql: &str, table: &str, row_count: i64, has_group_by: bool) -> Plan {
    let groups = if has_group_by {
        row_count.min(10_000) as f64
    } else {
        0.0
    };
    let cost = row_count as f64 * C_SCAN + groups * C_HASH;

    Plan {
        plan_type: PlanType::Exact,
        rewritten_sql: sql.to_string(),
        original_sql: sql.to_string(),
        table: Some(table.to_string()),
        sample_table: None,
        sample_fraction: None,
        estimated_cost: cost,
        estimated_error: 0.0,
        reason: "exact execution".to_string(),
    }
}

async fn sample_candidate(
    pool: &SqlitePool,
    sql: &str,
    table: &str,
    row_count: i64,
    max_rel_error: f64,
) -> Option<Plan> {
    let samples = MetadataStore::list_samples_for_table(pool, table).await.ok()?;
    // Samples lacking a strata column are uniform; the planner only
    // considers uniform samples here (stratified samples are reached via
    // the direct-on-sample-table path, §4.2 step 2).
    let best = samples.into_iter().find(|s| s.strata_column.is_none())?;

    if !table_exists(pool, &best.sample_table).await.ok()? {
        return None;
    }

    let estimated_error = (1.0 / (best.fraction * row_count as f64)).sqrt();
    if estimated_error.is_nan() || estimated_error.is_infinite() {
        return None;
    }
    let _ = max_rel_error; // filtering happens centrally in `plan`

    let cost = row_count as f64 * best.fraction * C_SCAN + C_SAMPLE_SETUP;
    let rewritten_sql = replace_whole_identifier(sql, table, &best.sample_table);

    Some(Plan {
        plan_type: PlanType::Sample,
        rewritten_sql,
        original_sql: sql.to_string(),
        table: Some(table.to_string()),
        sample_table: Some(best.sample_table),
        sample_fraction: Some(best.fraction),
        estimated_cost: cost,
        estimated_error,
        reason: format!("using {:.1}% sample", best.fraction * 100.0),
    })
}

fn group_by_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqe_db::fixtures;
    use aqe_db::metadata::MetadataStore;
    use aqe_db::sampler::Sampler;
    use aqe_db::test_utils::TestDb;

    #[tokio::test]
    async fn falls_back_to_exact_without_table_name() {
        let db = TestDb::new().await.unwrap();
        let plan = Planner::plan(db.pool(), "SELECT 1", 0.05, false).await;
        assert_eq!(plan.plan_type, PlanType::Exact);
        assert_eq!(plan.reason, "no table found");
    }

    #[tokio::test]
    async fn falls_back_to_exact_without_stats() {
        let db = TestDb::new().await.unwrap();
        fixtures::create_purchases_table(db.pool()).await.unwrap();
        let plan = Planner::plan(db.pool(), "SELECT COUNT(*) FROM purchases", 0.05, false).await;
        assert_eq!(plan.plan_type, PlanType::Exact);
        assert_eq!(plan.reason, "no table stats available");
    }

    #[tokio::test]
    async fn prefer_exact_short_circuits() {
        let db = TestDb::new().await.unwrap();
        fixtures::create_purchases_table(db.pool()).await.unwrap();
        MetadataStore::upsert_table_stats(db.pool(), "purchases", 500)
            .await
            .unwrap();

        let plan = Planner::plan(db.pool(), "SELECT COUNT(*) FROM purchases", 0.05, true).await;
        assert_eq!(plan.plan_type, PlanType::Exact);
        assert_eq!(plan.reason, "user prefers exact");
    }

    #[tokio::test]
    async fn recognizes_direct_query_on_sample_table() {
        let db = TestDb::new().await.unwrap();
        let plan = Planner::plan(
            db.pool(),
            "SELECT COUNT(*) FROM purchases__sample_0_05",
            0.5,
            false,
        )
        .await;

        assert_eq!(plan.plan_type, PlanType::Sample);
        assert_eq!(plan.table.as_deref(), Some("purchases"));
        assert!((plan.sample_fraction.unwrap() - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recognizes_direct_query_on_stratified_sample_table() {
        let db = TestDb::new().await.unwrap();
        let plan = Planner::plan(
            db.pool(),
            "SELECT region, SUM(revenue) FROM orders__strat_sample_region_0_05 GROUP BY region",
            0.5,
            false,
        )
        .await;

        assert_eq!(plan.plan_type, PlanType::Stratified);
        assert_eq!(plan.table.as_deref(), Some("orders"));
    }

    #[tokio::test]
    async fn picks_sample_when_error_budget_allows_it() {
        let db = TestDb::new().await.unwrap();
        fixtures::create_orders_table(db.pool()).await.unwrap();
        MetadataStore::upsert_table_stats(db.pool(), "orders", 10_000)
            .await
            .unwrap();

        let sampler = Sampler;
        sampler
            .create_uniform_sample(db.pool(), "orders", 0.2)
            .await
            .unwrap();

        let plan = Planner::plan(db.pool(), "SELECT COUNT(*) FROM orders", 0.5, false).await;
        assert_eq!(plan.plan_type, PlanType::Sample);
        assert!(plan.rewritten_sql.contains("orders__sample_0_2"));
    }

    #[tokio::test]
    async fn rejects_sample_when_error_exceeds_budget() {
        let db = TestDb::new().await.unwrap();
        fixtures::create_orders_table(db.pool()).await.unwrap();
        MetadataStore::upsert_table_stats(db.pool(), "orders", 10_000)
            .await
            .unwrap();

        let sampler = Sampler;
        sampler
            .create_uniform_sample(db.pool(), "orders", 0.001)
            .await
            .unwrap();

        // error ~= sqrt(1/(0.001*10000)) = sqrt(0.1) ~= 0.316, well above 0.01
        let plan = Planner::plan(db.pool(), "SELECT COUNT(*) FROM orders", 0.01, false).await;
        assert_eq!(plan.plan_type, PlanType::Exact);
    }
}
