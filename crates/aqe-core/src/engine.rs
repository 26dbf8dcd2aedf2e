//! The public `query` operation: wires FeatureExtractor, MLOptimizer,
//! Planner, Executor and Scaler into the single request/response cycle
//! described by the engine's data flow (feature-extract -> optimize ->
//! plan -> execute -> scale -> record), strictly sequential within one
//! query.

use serde::Serialize;

use aqe_db::error::AqeResult;

use crate::executor::{execute_plan, ExecutionResult};
use crate::ml_optimizer::{MlOptimizer, Optimization};
use crate::planner::{Plan, PlanType, Planner};

/// A trimmed-down view of an `Optimization`, attached to the response so
/// a caller can see what the learning layer recommended even when the
/// Planner ultimately overrides it.
#[derive(Debug, Clone, Serialize)]
pub struct MlOptimizationSummary {
    pub strategy: String,
    pub confidence: f64,
    pub estimated_speedup: f64,
    pub estimated_error: f64,
    pub reasoning: String,
    pub used_learning_override: bool,
}

impl From<&Optimization> for MlOptimizationSummary {
    fn from(opt: &Optimization) -> Self {
        Self {
            strategy: opt.strategy.as_str().to_string(),
            confidence: opt.confidence,
            estimated_speedup: opt.predicted_speedup,
            estimated_error: opt.predicted_error,
            reasoning: opt.reasoning.clone(),
            used_learning_override: opt.used_learning_override,
        }
    }
}

/// The plan actually executed, independent of whatever the ML layer
/// proposed ahead of it.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub plan_type: String,
    pub rewritten_sql: String,
    pub estimated_cost: f64,
    pub estimated_error: f64,
    pub reason: String,
}

impl From<&Plan> for PlanSummary {
    fn from(plan: &Plan) -> Self {
        Self {
            plan_type: plan.plan_type.as_str().to_string(),
            rewritten_sql: plan.rewritten_sql.clone(),
            estimated_cost: plan.estimated_cost,
            estimated_error: plan.estimated_error,
            reason: plan.reason.clone(),
        }
    }
}

/// Result rows plus the scaling metadata the Executor attached.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub rows: Vec<crate::executor::ResultRow>,
    pub fraction: Option<f64>,
    pub biased_aggregates: Vec<String>,
    pub execution_time_ms: f64,
    pub predicted_speedup: f64,
    pub actual_speedup: f64,
}

impl From<ExecutionResult> for ResultSummary {
    fn from(exec: ExecutionResult) -> Self {
        Self {
            rows: exec.rows,
            fraction: exec.fraction,
            biased_aggregates: exec.biased_aggregates,
            execution_time_ms: exec.execution_time_ms,
            predicted_speedup: exec.predicted_speedup,
            actual_speedup: exec.actual_speedup,
        }
    }
}

/// The full `query` response: `{plan, result?, meta, ml_optimization?}`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub plan: PlanSummary,
    pub result: Option<ResultSummary>,
    pub ml_optimization: Option<MlOptimizationSummary>,
    pub explain: bool,
}

/// Run the full optimization pipeline for `sql`.
///
/// - `use_ml` engages the MLOptimizer ahead of the Planner; its rewritten
///   SQL is what the Planner then validates (the Planner still recognizes
///   a sample table name in a ML rewrite, per its own table-name parsing).
/// - `explain` stops short of executing: the caller gets the plan (and,
///   with `use_ml`, the optimization) without running anything or writing
///   a performance record.
pub async fn query(
    pool: &sqlx::SqlitePool,
    sql: &str,
    max_rel_error: f64,
    prefer_exact: bool,
    use_ml: bool,
    explain: bool,
) -> AqeResult<QueryResponse> {
    let optimization = if use_ml && !prefer_exact {
        Some(MlOptimizer::optimize_query(pool, sql, max_rel_error).await?)
    } else {
        None
    };

    let sql_to_plan = optimization
        .as_ref()
        .map(|opt| opt.rewritten_sql.as_str())
        .unwrap_or(sql);

    let plan = Planner::plan(pool, sql_to_plan, max_rel_error, prefer_exact).await;

    if explain {
        return Ok(QueryResponse {
            plan: PlanSummary::from(&plan),
            result: None,
            ml_optimization: optimization.as_ref().map(MlOptimizationSummary::from),
            explain: true,
        });
    }

    let predicted_speedup = optimization
        .as_ref()
        .map(|opt| opt.predicted_speedup)
        .unwrap_or(1.0);
    let is_sampled = !matches!(plan.plan_type, PlanType::Exact);
    let baseline_sql = if is_sampled && optimization.is_some() {
        Some(sql)
    } else {
        None
    };

    let exec = execute_plan(pool, &plan, predicted_speedup, baseline_sql).await?;

    if let Some(opt) = &optimization {
        MlOptimizer::record_outcome(
            pool,
            opt,
            exec.actual_speedup,
            opt.predicted_error,
            exec.execution_time_ms,
            max_rel_error,
        )
        .await?;
    }

    Ok(QueryResponse {
        plan: PlanSummary::from(&plan),
        ml_optimization: optimization.as_ref().map(MlOptimizationSummary::from),
        result: Some(ResultSummary::from(exec)),
        explain: false,
    })
}
