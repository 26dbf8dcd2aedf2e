use serde::{Deserialize, Serialize};

/// One row per base table: `(table_name -> row_count, updated_at)`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TableStats {
    pub table_name: String,
    pub row_count: i64,
    pub updated_at: String,
}

/// A uniform or stratified sample drawn from a base table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SampleDescriptor {
    pub id: i64,
    pub base_table: String,
    pub sample_table: String,
    pub fraction: f64,
    pub strata_column: Option<String>,
    pub created_at: String,
}

/// Per-stratum allocation and achieved counts for a stratified sample.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StratumRecord {
    pub sample_table: String,
    pub strata_key: String,
    pub strata_value: String,
    pub pop_size: i64,
    pub sample_size: i64,
    pub fraction: f64,
    pub weight: f64,
    pub variance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SketchType {
    Hyperloglog,
    Countmin,
}

impl SketchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SketchType::Hyperloglog => "hyperloglog",
            SketchType::Countmin => "countmin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hyperloglog" => Some(SketchType::Hyperloglog),
            "countmin" => Some(SketchType::Countmin),
            _ => None,
        }
    }
}

/// A stored probabilistic sketch. Uniqueness key is `(table, column, sketch_type)`;
/// `column` is stored as `""` rather than `NULL` so that SQLite's
/// multi-valued-NULL-in-UNIQUE semantics don't defeat the upsert.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SketchRecord {
    pub table_name: String,
    pub column_name: String,
    pub sketch_type: String,
    pub sketch_data: Vec<u8>,
    pub parameters: String,
    pub created_at: String,
}

/// Append-only record of a plan's predicted vs. actual performance, used
/// by the learning override in the ML optimizer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PerformanceRecord {
    pub id: i64,
    pub query_pattern: String,
    pub table_size: i64,
    pub strategy: String,
    pub predicted_speedup: f64,
    pub predicted_error: f64,
    pub actual_speedup: f64,
    pub actual_error: f64,
    pub execution_time_ms: f64,
    pub error_tolerance: f64,
    pub timestamp: String,
    pub features: String,
}

/// A not-yet-persisted performance record (no `id`/`timestamp` yet).
#[derive(Debug, Clone)]
pub struct NewPerformanceRecord {
    pub query_pattern: String,
    pub table_size: i64,
    pub strategy: String,
    pub predicted_speedup: f64,
    pub predicted_error: f64,
    pub actual_speedup: f64,
    pub actual_error: f64,
    pub execution_time_ms: f64,
    pub error_tolerance: f64,
    pub features: String,
}
