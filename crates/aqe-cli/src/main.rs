use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod output;

#[derive(Parser)]
#[command(
    name = "aqe",
    about = "An approximate query engine: rewrites aggregate SQL onto samples and sketches, with a confidence interval attached."
)]
#[command(author, version, long_about = None)]
struct Cli {
    /// Path to an `aqe.toml` config file (defaults to `./aqe.toml` if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tables the engine can query or sample
    #[command(name = "list-tables")]
    ListTables {
        #[arg(short, long, env = "AQE_DATABASE_URL")]
        database_url: Option<String>,

        #[arg(short, long, value_enum, default_value = "table")]
        format: output::OutputFormat,
    },

    /// Run a SQL query through the optimization pipeline
    Query {
        #[arg(short, long, env = "AQE_DATABASE_URL")]
        database_url: Option<String>,

        /// The SQL to run
        sql: String,

        /// Maximum tolerated relative error for an approximate plan
        #[arg(short = 'e', long)]
        max_rel_error: Option<f64>,

        /// Force exact execution, bypassing the planner's cost comparison
        #[arg(long)]
        prefer_exact: bool,

        /// Let the ML optimizer choose and rewrite the query ahead of the planner
        #[arg(long)]
        use_ml: bool,

        /// Show the plan without executing it
        #[arg(long)]
        explain: bool,

        #[arg(short = 'f', long, value_enum, default_value = "table")]
        format: output::OutputFormat,
    },

    /// Build and manage samples
    #[command(subcommand)]
    Sample(SampleCommands),

    /// Build and inspect probabilistic sketches
    #[command(subcommand)]
    Sketch(SketchCommands),

    /// Show aggregate learning-table statistics
    LearningStats {
        #[arg(short, long, env = "AQE_DATABASE_URL")]
        database_url: Option<String>,

        #[arg(short = 'f', long, value_enum, default_value = "table")]
        format: output::OutputFormat,
    },
}

#[derive(Subcommand)]
enum SampleCommands {
    /// Create a uniform random sample of a table
    Uniform {
        #[arg(short, long, env = "AQE_DATABASE_URL")]
        database_url: Option<String>,

        table: String,

        /// Sampling fraction in (0, 1)
        fraction: f64,

        #[arg(short = 'f', long, value_enum, default_value = "table")]
        format: output::OutputFormat,
    },

    /// Create a stratified sample, proportional or Neyman-optimal
    Stratified {
        #[arg(short, long, env = "AQE_DATABASE_URL")]
        database_url: Option<String>,

        table: String,

        /// Column to stratify by
        strata_column: String,

        /// Total sampling fraction in (0, 1)
        total_fraction: f64,

        /// Column whose in-stratum variance drives Neyman-optimal allocation;
        /// omit for proportional allocation
        #[arg(long)]
        variance_column: Option<String>,

        #[arg(short = 'f', long, value_enum, default_value = "table")]
        format: output::OutputFormat,
    },
}

#[derive(Subcommand)]
enum SketchCommands {
    /// Build a sketch over a column and persist it
    Create {
        #[arg(short, long, env = "AQE_DATABASE_URL")]
        database_url: Option<String>,

        table: String,
        column: String,

        /// hyperloglog or countmin
        #[arg(long, default_value = "hyperloglog")]
        sketch_type: String,

        /// HyperLogLog register-selection bits, 4..=16 (default 10)
        #[arg(long)]
        b: Option<u8>,

        /// Count-Min epsilon (default 0.01)
        #[arg(long)]
        epsilon: Option<f64>,

        /// Count-Min delta (default 0.01)
        #[arg(long)]
        delta: Option<f64>,

        #[arg(short = 'f', long, value_enum, default_value = "table")]
        format: output::OutputFormat,
    },

    /// List sketches built for a table
    List {
        #[arg(short, long, env = "AQE_DATABASE_URL")]
        database_url: Option<String>,

        table: String,

        #[arg(short = 'f', long, value_enum, default_value = "table")]
        format: output::OutputFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = aqe_core::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::ListTables {
            database_url,
            format,
        } => {
            commands::discover::run(&resolve_url(database_url, &config), format).await?;
        }
        Commands::Query {
            database_url,
            sql,
            max_rel_error,
            prefer_exact,
            use_ml,
            explain,
            format,
        } => {
            commands::query::run(
                &resolve_url(database_url, &config),
                &sql,
                max_rel_error.unwrap_or(config.default_max_rel_error),
                prefer_exact,
                use_ml,
                explain,
                format,
            )
            .await?;
        }
        Commands::Sample(SampleCommands::Uniform {
            database_url,
            table,
            fraction,
            format,
        }) => {
            commands::sample::run_uniform(&resolve_url(database_url, &config), &table, fraction, format)
                .await?;
        }
        Commands::Sample(SampleCommands::Stratified {
            database_url,
            table,
            strata_column,
            total_fraction,
            variance_column,
            format,
        }) => {
            commands::sample::run_stratified(
                &resolve_url(database_url, &config),
                &table,
                &strata_column,
                total_fraction,
                variance_column.as_deref(),
                format,
            )
            .await?;
        }
        Commands::Sketch(SketchCommands::Create {
            database_url,
            table,
            column,
            sketch_type,
            b,
            epsilon,
            delta,
            format,
        }) => {
            commands::sketch::run_create(
                &resolve_url(database_url, &config),
                &table,
                &column,
                &sketch_type,
                b.unwrap_or(config.hll_default_b),
                epsilon.unwrap_or(config.cms_default_epsilon),
                delta.unwrap_or(config.cms_default_delta),
                format,
            )
            .await?;
        }
        Commands::Sketch(SketchCommands::List {
            database_url,
            table,
            format,
        }) => {
            commands::sketch::run_list(&resolve_url(database_url, &config), &table, format).await?;
        }
        Commands::LearningStats {
            database_url,
            format,
        } => {
            commands::learning::run(&resolve_url(database_url, &config), format).await?;
        }
    }
    Ok(())
}

fn resolve_url(database_url: Option<String>, config: &aqe_core::Config) -> String {
    database_url.unwrap_or_else(|| config.database_url.clone())
}
