//! Runs a plan against the backing store and scales its result back to
//! population scale, attaching confidence intervals and flagging
//! aggregates that sampling cannot scale safely.

use std::time::Instant;

use serde_json::{Map, Value};
use sqlx::{Column, Row, SqlitePool};
use tracing::warn;

use aqe_db::error::AqeResult;

use crate::planner::{Plan, PlanType};

const SCALABLE_MARKERS: [&str; 5] = ["COUNT", "SUM", "TOTAL", "REVENUE", "ORDERS"];
const UNSCALABLE_MARKERS: [&str; 2] = ["MIN", "MAX"];

/// One returned row, column name to JSON value.
pub type ResultRow = Map<String, Value>;

/// The outcome of running a plan: the (possibly scaled) rows plus metadata
/// about what happened along the way.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub rows: Vec<ResultRow>,
    pub plan_type: &'static str,
    pub fraction: Option<f64>,
    /// Columns whose uppercased name matched MIN/MAX under a sampled plan:
    /// present, unscaled, and named here so callers don't silently trust
    /// a biased value.
    pub biased_aggregates: Vec<String>,
    pub execution_time_ms: f64,
    pub predicted_speedup: f64,
    pub actual_speedup: f64,
}

/// Run `plan` and scale its result. `predicted_speedup` comes from the
/// plan/optimization that produced it; when `baseline` is `Some`, the exact
/// SQL is timed too so `actual_speedup` reflects a real side-by-side
/// comparison rather than the prediction.
pub async fn execute_plan(
    pool: &SqlitePool,
    plan: &Plan,
    predicted_speedup: f64,
    baseline_sql: Option<&str>,
) -> AqeResult<ExecutionResult> {
    let start = Instant::now();
    let rows = run_query(pool, &plan.rewritten_sql).await?;
    let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let is_sampled = matches!(plan.plan_type, PlanType::Sample | PlanType::Stratified);
    let fraction = plan.sample_fraction;

    let (scaled_rows, biased_aggregates) = if is_sampled {
        if let Some(fraction) = fraction {
            scale_rows(rows, fraction)
        } else {
            (rows, Vec::new())
        }
    } else {
        (rows, Vec::new())
    };

    let actual_speedup = match baseline_sql {
        Some(sql) if is_sampled => match time_baseline(pool, sql).await {
            Some(baseline_ms) if execution_time_ms > 0.0 => baseline_ms / execution_time_ms,
            _ => predicted_speedup,
        },
        _ => predicted_speedup,
    };

    Ok(ExecutionResult {
        rows: scaled_rows,
        plan_type: plan.plan_type.as_str(),
        fraction,
        biased_aggregates,
        execution_time_ms,
        predicted_speedup,
        actual_speedup,
    })
}

async fn time_baseline(pool: &SqlitePool, sql: &str) -> Option<f64> {
    let start = Instant::now();
    match run_query(pool, sql).await {
        Ok(_) => Some(start.elapsed().as_secs_f64() * 1000.0),
        Err(err) => {
            warn!(error = %err, "exact baseline query failed, falling back to predicted speedup");
            None
        }
    }
}

async fn run_query(pool: &SqlitePool, sql: &str) -> AqeResult<Vec<ResultRow>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;

    Ok(rows.iter().map(row_to_map).collect())
}

fn row_to_map(row: &sqlx::sqlite::SqliteRow) -> ResultRow {
    let mut map = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = sqlite_value_to_json(row, idx);
        map.insert(name, value);
    }
    map
}

fn sqlite_value_to_json(row: &sqlx::sqlite::SqliteRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::from(v);
    }
    Value::Null
}

/// Scale aggregate columns by `1/fraction`, collect the MIN/MAX columns
/// left untouched, and attach `{col}_ci_low`/`{col}_ci_high`/`{col}_rel_error`
/// on the first row for every scaled numeric column.
fn scale_rows(mut rows: Vec<ResultRow>, fraction: f64) -> (Vec<ResultRow>, Vec<String>) {
    if rows.is_empty() || fraction <= 0.0 {
        return (rows, Vec::new());
    }

    let scale = 1.0 / fraction;
    let columns: Vec<String> = rows[0].keys().cloned().collect();
    let mut biased = Vec::new();
    let mut scaled_columns = Vec::new();

    for col in &columns {
        let upper = col.to_uppercase();
        if UNSCALABLE_MARKERS.iter().any(|m| upper.contains(m)) {
            biased.push(col.clone());
            continue;
        }
        if SCALABLE_MARKERS.iter().any(|m| upper.contains(m)) {
            scaled_columns.push(col.clone());
        }
    }

    // Capture pre-scale sample values for the CI computation before the
    // columns are overwritten with their scaled counterparts below.
    let mut raw_values: std::collections::HashMap<&str, Vec<f64>> = std::collections::HashMap::new();
    for col in &scaled_columns {
        let values: Vec<f64> = rows.iter().filter_map(|r| r.get(col).and_then(Value::as_f64)).collect();
        raw_values.insert(col.as_str(), values);
    }

    for row in rows.iter_mut() {
        for col in &scaled_columns {
            if let Some(value) = row.get(col).and_then(Value::as_f64) {
                row.insert(col.clone(), json_number(value * scale));
            }
        }
    }

    for col in &scaled_columns {
        let values = raw_values.get(col.as_str()).cloned().unwrap_or_default();
        if let Some(ci) = confidence_interval(&values, scale) {
            if let Some(first) = rows.first_mut() {
                first.insert(format!("{col}_ci_low"), json_number(ci.0));
                first.insert(format!("{col}_ci_high"), json_number(ci.1));
                first.insert(format!("{col}_rel_error"), json_number(ci.2));
            }
        }
    }

    (rows, biased)
}

/// `(ci_low, ci_high, rel_error)` under the normal approximation, already
/// rescaled back to population units.
fn confidence_interval(values: &[f64], scale: f64) -> Option<(f64, f64, f64)> {
    let n = values.len();
    if n == 0 {
        return None;
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = if n > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };
    let std_dev = variance.sqrt();
    let margin = 1.96 * std_dev / (n as f64).sqrt();

    let scaled_mean = mean * scale;
    let low = (mean - margin) * scale;
    let high = (mean + margin) * scale;

    if scaled_mean.abs() < f64::EPSILON {
        return Some((low, high, 0.0));
    }

    let rel_error = (high - low) / (2.0 * scaled_mean);
    Some((low, high, rel_error))
}

fn json_number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
