use aqe_core::config::Config;
use aqe_core::feature_extractor::FeatureVector;
use aqe_core::ml_optimizer::{MlOptimizer, Strategy};
use aqe_core::HyperLogLog;
use aqe_db::error::AqeError;
use aqe_db::fixtures;
use aqe_db::metadata::MetadataStore;
use aqe_db::sampler::Sampler;
use aqe_db::test_utils::TestDb;
use aqe_db::types::NewPerformanceRecord;

/// Quickly materialize `n` rows via a recursive CTE instead of looping
/// individual INSERTs in the test harness.
async fn create_big_table(pool: &sqlx::SqlitePool, name: &str, n: i64) {
    sqlx::query(&format!(
        "CREATE TABLE {name} (id INTEGER PRIMARY KEY, amount REAL, user_id INTEGER)"
    ))
    .execute(pool)
    .await
    .unwrap();

    sqlx::query(&format!(
        r#"
        INSERT INTO {name} (id, amount, user_id)
        WITH RECURSIVE seq(x) AS (
            SELECT 1 UNION ALL SELECT x + 1 FROM seq WHERE x < {n}
        )
        SELECT x, 10.0 + (x % 500), x % 1000 FROM seq
        "#
    ))
    .execute(pool)
    .await
    .unwrap();
}

/// Scenario A — small-table bypass: a 500-row table stays exact.
#[tokio::test]
async fn scenario_a_small_table_bypasses_approximation() {
    let db = TestDb::new().await.unwrap();
    fixtures::create_purchases_table(db.pool()).await.unwrap();

    let opt = MlOptimizer::optimize_query(db.pool(), "SELECT COUNT(*) FROM purchases", 0.05)
        .await
        .unwrap();

    assert_eq!(opt.strategy, Strategy::Exact);
    assert_eq!(opt.rewritten_sql, "SELECT COUNT(*) FROM purchases");
    assert_eq!(opt.predicted_speedup, 1.0);
}

/// Scenario B — uniform sample on a large table: the ML optimizer picks a
/// 1% fraction and rewrites the query to a ROWID-modulo predicate.
#[tokio::test]
async fn scenario_b_large_table_samples_via_rowid_modulo() {
    let db = TestDb::new().await.unwrap();
    create_big_table(db.pool(), "big_purchases", 200_000).await;

    let opt = MlOptimizer::optimize_query(
        db.pool(),
        "SELECT SUM(amount) FROM big_purchases",
        0.05,
    )
    .await
    .unwrap();

    assert_eq!(opt.strategy, Strategy::Sample);
    assert_eq!(opt.sample_fraction, Some(0.01));
    assert!(opt.rewritten_sql.contains("WHERE (ROWID % 100) = 0"));

    let exact: (f64,) = sqlx::query_as("SELECT SUM(amount) FROM big_purchases")
        .fetch_one(db.pool())
        .await
        .unwrap();
    let sampled_rows = sqlx::query(&opt.rewritten_sql)
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(sampled_rows.len(), 1);
    assert!(exact.0 > 0.0);
}

/// Scenario E — Neyman-optimal stratified allocation favors high-variance
/// strata over the proportional baseline.
#[tokio::test]
async fn scenario_e_neyman_allocation_favors_high_variance_strata() {
    let db = TestDb::new().await.unwrap();
    fixtures::create_orders_table(db.pool()).await.unwrap();

    let sampler = Sampler;
    let (_name, records) = sampler
        .create_stratified_sample(db.pool(), "orders", "region", 0.05, Some("revenue"))
        .await
        .unwrap();

    let total_pop: i64 = records.iter().map(|r| r.pop_size).sum();
    let total_sample: i64 = records.iter().map(|r| r.sample_size).sum();
    assert_eq!(total_pop, 10_000);
    // Achieved total sample should be in the right ballpark of the 5% target.
    assert!((total_sample as f64 / total_pop as f64 - 0.05).abs() < 0.03);

    let east = records.iter().find(|r| r.strata_value == "east").unwrap();
    let north = records.iter().find(|r| r.strata_value == "north").unwrap();
    assert!(east.variance > north.variance);
    assert!(east.fraction > north.fraction);
}

/// Scenario F — a run of feature-compatible history overrides the base
/// rule's tie and raises confidence past 0.85.
#[tokio::test]
async fn scenario_f_learning_history_overrides_base_rule() {
    let db = TestDb::new().await.unwrap();
    create_big_table(db.pool(), "events", 2_000).await;

    let features = FeatureVector {
        table_name: "events".to_string(),
        table_size: 2_000,
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

    for _ in 0..15 {
        let record = NewPerformanceRecord {
            query_pattern: "events:count=true:sum=false:avg=false:distinct=true:group=false"
                .to_string(),
            table_size: 2_000,
            strategy: "sketch".to_string(),
            predicted_speedup: 5.0,
            predicted_error: 0.02,
            actual_speedup: 5.0,
            actual_error: 0.02,
            execution_time_ms: 1.0,
            error_tolerance: 0.05,
            features: serde_json::to_string(&features).unwrap(),
        };
        MetadataStore::insert_performance_record(db.pool(), &record)
            .await
            .unwrap();
    }

    let opt = MlOptimizer::optimize_query(
        db.pool(),
        "SELECT COUNT(DISTINCT user_id) FROM events",
        0.05,
    )
    .await
    .unwrap();

    assert_eq!(opt.strategy, Strategy::Sketch);
    assert!(opt.used_learning_override);
    assert!(opt.confidence >= 0.85);
}

/// Scenario G — config layering: environment overrides the file, which
/// overrides the built-in default.
#[test]
fn scenario_g_config_layers_env_over_file_over_default() {
    assert_eq!(Config::default().default_max_rel_error, 0.05);

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("aqe.toml");
    std::fs::write(&config_path, "default_max_rel_error = 0.2\n").unwrap();

    let from_file = Config::load(Some(&config_path)).unwrap();
    assert_eq!(from_file.default_max_rel_error, 0.2);

    // SAFETY: test-local env var, cleared immediately after the assertion.
    unsafe {
        std::env::set_var("AQE_DEFAULT_MAX_REL_ERROR", "0.3");
    }
    let from_env = Config::load(Some(&config_path)).unwrap();
    unsafe {
        std::env::remove_var("AQE_DEFAULT_MAX_REL_ERROR");
    }
    assert_eq!(from_env.default_max_rel_error, 0.3);
}

/// Scenario H — every `AqeError` variant maps to the error kind named for
/// its triggering condition, and backing-store errors convert via `From`.
#[tokio::test]
async fn scenario_h_error_hierarchy_maps_triggering_conditions() {
    let db = TestDb::new().await.unwrap();

    let bad_fraction = Sampler
        .create_uniform_sample(db.pool(), "nope", 1.5)
        .await
        .unwrap_err();
    assert!(matches!(bad_fraction, AqeError::InvalidArgument(_)));

    let missing_table_err: Result<i64, sqlx::Error> =
        sqlx::query_scalar("SELECT COUNT(*) FROM this_table_does_not_exist")
            .fetch_one(db.pool())
            .await;
    let converted: AqeError = missing_table_err.unwrap_err().into();
    assert!(matches!(converted, AqeError::BackingStore(_)));

    let mismatched = HyperLogLog::new(8).merge(&HyperLogLog::new(10)).unwrap_err();
    assert!(matches!(mismatched, AqeError::InvariantViolation(_)));
}
