use clap::ValueEnum;
use colored::Colorize;
use serde_json::json;
use tabled::{Table, Tabled, settings::Style};

use aqe_core::engine::QueryResponse;
use aqe_core::sketch_ops::{SketchBuildSummary, SketchDescription};
use aqe_db::types::StratumRecord;

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Markdown,
}

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Table")]
    pub name: String,
}

pub fn print_tables(tables: &[String], format: &OutputFormat) {
    match format {
        OutputFormat::Table => {
            if tables.is_empty() {
                println!("{}", "No tables found.".yellow());
                return;
            }
            let rows: Vec<TableRow> = tables.iter().map(|t| TableRow { name: t.clone() }).collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("\n{}", "Tables:".bold().green());
            println!("{}", table);
            println!("\nFound {} table(s)\n", tables.len());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "tables": tables, "count": tables.len() }))
                    .unwrap()
            );
        }
        OutputFormat::Markdown => {
            println!("# Tables\n");
            println!("| Table |");
            println!("|-------|");
            for t in tables {
                println!("| {t} |");
            }
            println!("\nFound {} table(s)\n", tables.len());
        }
    }
}

pub fn print_query_response(response: &QueryResponse, format: &OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response).unwrap());
        }
        OutputFormat::Markdown => print_query_markdown(response),
        OutputFormat::Table => print_query_table(response),
    }
}

fn print_query_table(response: &QueryResponse) {
    println!(
        "\n{} {}",
        "Strategy:".bold(),
        response.plan.plan_type.to_uppercase().cyan().bold()
    );
    println!("{} {}", "Reason:".bold(), response.plan.reason);
    println!(
        "{} cost={:.1} error={:.4}",
        "Estimate:".bold(),
        response.plan.estimated_cost,
        response.plan.estimated_error
    );
    println!("{}\n  {}", "Rewritten SQL:".bold(), response.plan.rewritten_sql.dimmed());

    if let Some(opt) = &response.ml_optimization {
        println!(
            "\n{} {} (confidence {:.2}{})",
            "ML suggestion:".bold().magenta(),
            opt.strategy.to_uppercase(),
            opt.confidence,
            if opt.used_learning_override {
                ", learned override".to_string()
            } else {
                String::new()
            }
        );
        println!("  {}", opt.reasoning.dimmed());
    }

    match &response.result {
        None => println!("\n{}", "(explain mode: not executed)".yellow()),
        Some(result) => {
            println!(
                "\n{} {:.1}ms, predicted {:.1}x, actual {:.1}x speedup",
                "Executed in".bold().green(),
                result.execution_time_ms,
                result.predicted_speedup,
                result.actual_speedup
            );
            if !result.biased_aggregates.is_empty() {
                println!(
                    "{} {} (MIN/MAX are not scalable under sampling)",
                    "Warning:".yellow().bold(),
                    result.biased_aggregates.join(", ")
                );
            }
            for (i, row) in result.rows.iter().enumerate() {
                println!("row {i}: {}", serde_json::to_string(row).unwrap());
            }
        }
    }
    println!();
}

fn print_query_markdown(response: &QueryResponse) {
    println!("# Query result\n");
    println!("- **Strategy:** {}", response.plan.plan_type);
    println!("- **Reason:** {}", response.plan.reason);
    println!(
        "- **Estimated cost / error:** {:.1} / {:.4}",
        response.plan.estimated_cost, response.plan.estimated_error
    );
    println!("\n```sql\n{}\n```\n", response.plan.rewritten_sql);

    if let Some(opt) = &response.ml_optimization {
        println!(
            "## ML optimization\n\n- strategy: {}\n- confidence: {:.2}\n- reasoning: {}\n",
            opt.strategy, opt.confidence, opt.reasoning
        );
    }

    match &response.result {
        None => println!("_explain mode: not executed_\n"),
        Some(result) => {
            println!(
                "## Result\n\n- rows: {}\n- execution time: {:.1}ms\n- actual speedup: {:.1}x\n",
                result.rows.len(),
                result.execution_time_ms,
                result.actual_speedup
            );
        }
    }
}

pub fn print_uniform_sample(sample_table: &str, row_count: i64, format: &OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "sample_table": sample_table, "rows": row_count }))
                .unwrap()
        ),
        OutputFormat::Markdown => {
            println!("# Uniform sample\n\n- table: `{sample_table}`\n- rows: {row_count}\n")
        }
        OutputFormat::Table => {
            println!(
                "\n{} {} ({} rows)\n",
                "Created sample".bold().green(),
                sample_table.cyan(),
                row_count
            );
        }
    }
}

#[derive(Tabled)]
pub struct StratumRow {
    #[tabled(rename = "Stratum")]
    pub value: String,
    #[tabled(rename = "Pop. size")]
    pub pop_size: i64,
    #[tabled(rename = "Sample size")]
    pub sample_size: i64,
    #[tabled(rename = "Fraction")]
    pub fraction: String,
    #[tabled(rename = "Variance")]
    pub variance: String,
}

impl From<&StratumRecord> for StratumRow {
    fn from(r: &StratumRecord) -> Self {
        Self {
            value: r.strata_value.clone(),
            pop_size: r.pop_size,
            sample_size: r.sample_size,
            fraction: format!("{:.4}", r.fraction),
            variance: format!("{:.2}", r.variance),
        }
    }
}

pub fn print_stratified_sample(sample_table: &str, strata: &[StratumRecord], format: &OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "sample_table": sample_table, "strata": strata_to_json(strata) }))
                .unwrap()
        ),
        OutputFormat::Markdown => {
            println!("# Stratified sample: `{sample_table}`\n");
            println!("| Stratum | Pop. size | Sample size | Fraction | Variance |");
            println!("|---------|-----------|-------------|----------|----------|");
            for s in strata {
                println!(
                    "| {} | {} | {} | {:.4} | {:.2} |",
                    s.strata_value, s.pop_size, s.sample_size, s.fraction, s.variance
                );
            }
        }
        OutputFormat::Table => {
            println!("\n{} {}\n", "Created stratified sample".bold().green(), sample_table.cyan());
            let rows: Vec<StratumRow> = strata.iter().map(StratumRow::from).collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{}", table);
            println!();
        }
    }
}

fn strata_to_json(strata: &[StratumRecord]) -> serde_json::Value {
    json!(
        strata
            .iter()
            .map(|s| json!({
                "strata_value": s.strata_value,
                "pop_size": s.pop_size,
                "sample_size": s.sample_size,
                "fraction": s.fraction,
                "weight": s.weight,
                "variance": s.variance,
            }))
            .collect::<Vec<_>>()
    )
}

pub fn print_sketch_build(summary: &SketchBuildSummary, format: &OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(summary).unwrap()),
        OutputFormat::Markdown => {
            println!(
                "# Sketch built\n\n- table: `{}`\n- column: `{}`\n- type: {}\n- rows scanned: {}\n",
                summary.table, summary.column, summary.sketch_type, summary.rows_scanned
            );
            if let Some(estimate) = summary.estimated_distinct {
                println!("- estimated distinct values: {estimate}\n");
            }
        }
        OutputFormat::Table => {
            println!(
                "\n{} {} sketch on {}.{} ({} rows scanned)",
                "Built".bold().green(),
                summary.sketch_type,
                summary.table.cyan(),
                summary.column.cyan(),
                summary.rows_scanned
            );
            if let Some(estimate) = summary.estimated_distinct {
                println!("  estimated distinct values: {estimate}");
            }
            println!();
        }
    }
}

#[derive(Tabled)]
pub struct SketchRow {
    #[tabled(rename = "Column")]
    pub column: String,
    #[tabled(rename = "Type")]
    pub sketch_type: String,
    #[tabled(rename = "Parameters")]
    pub parameters: String,
    #[tabled(rename = "Est. distinct")]
    pub estimated_distinct: String,
    #[tabled(rename = "Created")]
    pub created_at: String,
}

impl From<&SketchDescription> for SketchRow {
    fn from(d: &SketchDescription) -> Self {
        Self {
            column: d.column.clone(),
            sketch_type: d.sketch_type.clone(),
            parameters: d.parameters.to_string(),
            estimated_distinct: d
                .estimated_distinct
                .map_or("-".to_string(), |v| v.to_string()),
            created_at: d.created_at.clone(),
        }
    }
}

pub fn print_sketches(descriptions: &[SketchDescription], format: &OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "sketches": descriptions, "count": descriptions.len() }))
                .unwrap()
        ),
        OutputFormat::Markdown => {
            println!("# Sketches\n");
            println!("| Column | Type | Parameters | Est. distinct | Created |");
            println!("|--------|------|------------|----------------|---------|");
            for d in descriptions {
                println!(
                    "| {} | {} | {} | {} | {} |",
                    d.column,
                    d.sketch_type,
                    d.parameters,
                    d.estimated_distinct.map_or("-".to_string(), |v| v.to_string()),
                    d.created_at
                );
            }
        }
        OutputFormat::Table => {
            if descriptions.is_empty() {
                println!("{}", "No sketches found for this table.".yellow());
                return;
            }
            let rows: Vec<SketchRow> = descriptions.iter().map(SketchRow::from).collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("\n{}", "Sketches:".bold().green());
            println!("{}", table);
            println!();
        }
    }
}

#[derive(Tabled)]
pub struct StrategyStatsRow {
    #[tabled(rename = "Strategy")]
    pub strategy: String,
    #[tabled(rename = "Queries")]
    pub query_count: i64,
    #[tabled(rename = "Avg speedup")]
    pub avg_speedup: String,
    #[tabled(rename = "Avg error")]
    pub avg_error: String,
}

pub fn print_learning_stats(per_strategy: &[(String, i64, f64, f64)], total: i64, format: &OutputFormat) {
    match format {
        OutputFormat::Json => {
            let strategies: Vec<_> = per_strategy
                .iter()
                .map(|(strategy, count, speedup, error)| {
                    json!({
                        "strategy": strategy,
                        "query_count": count,
                        "avg_speedup": speedup,
                        "avg_error": error,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "strategies": strategies, "total_queries": total }))
                    .unwrap()
            );
        }
        OutputFormat::Markdown => {
            println!("# Learning stats (last 30 days)\n");
            println!("Total recorded queries: {total}\n");
            println!("| Strategy | Queries | Avg speedup | Avg error |");
            println!("|----------|---------|-------------|-----------|");
            for (strategy, count, speedup, error) in per_strategy {
                println!("| {strategy} | {count} | {speedup:.2} | {error:.4} |");
            }
        }
        OutputFormat::Table => {
            println!("\n{}", "Learning stats (last 30 days):".bold().green());
            println!("  total recorded queries: {total}\n");
            if per_strategy.is_empty() {
                println!("{}", "No performance history recorded yet.".yellow());
                return;
            }
            let rows: Vec<StrategyStatsRow> = per_strategy
                .iter()
                .map(|(strategy, count, speedup, error)| StrategyStatsRow {
                    strategy: strategy.clone(),
                    query_count: *count,
                    avg_speedup: format!("{speedup:.2}x"),
                    avg_error: format!("{error:.4}"),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{}", table);
            println!();
        }
    }
}
