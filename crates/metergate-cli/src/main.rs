//! Metergate command-line tool.
//!
//! Surfaces the gateway's offline operations: rewriting a query, pricing a
//! byte estimate, validating a thresholds file, and printing the TTL table.
//! Nothing here talks to a warehouse.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use metergate_core::{
    CostEstimator, CostThresholds, QueryCategory, QueryRewriter, TtlPolicy,
};

/// Metergate cost-control tooling.
#[derive(Parser, Debug)]
#[command(name = "metergate")]
#[command(version, about = "Cost-aware query gateway tooling")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rewrite a query through the optimization rules.
    Rewrite {
        /// Query category (interactive, report, realtime, historical, funnel, general).
        #[arg(short, long, default_value = "general")]
        category: QueryCategory,

        /// The query text.
        sql: String,
    },
    /// Price a byte estimate against the default thresholds.
    Estimate {
        /// Bytes the query would scan.
        #[arg(short, long)]
        bytes: i64,
    },
    /// Validate a JSON thresholds file.
    CheckConfig {
        /// Path to the thresholds file.
        path: PathBuf,
    },
    /// Print the default category to cache-TTL table.
    TtlTable,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("metergate=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Command::Rewrite { category, sql } => rewrite(category, &sql),
        Command::Estimate { bytes } => estimate(bytes),
        Command::CheckConfig { path } => check_config(&path),
        Command::TtlTable => ttl_table(),
    }
}

fn rewrite(category: QueryCategory, sql: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rewriter = QueryRewriter::new();
    let outcome = rewriter.rewrite(sql, category);
    let savings = rewriter.estimated_savings(sql, &outcome.sql);

    println!("{}", outcome.sql);
    if !outcome.applied.is_empty() {
        println!();
        println!("Rules applied:");
        for rule in &outcome.applied {
            println!("  - {rule}");
        }
    }
    for warning in &outcome.warnings {
        println!("Warning: {warning}");
    }
    if savings.reduction_percent > 0 {
        println!(
            "Estimated scan reduction: {}%",
            savings.reduction_percent
        );
        for factor in &savings.factors {
            println!("  - {factor}");
        }
    }
    Ok(())
}

fn estimate(bytes: i64) -> Result<(), Box<dyn std::error::Error>> {
    let thresholds = CostThresholds::default();
    let estimate = CostEstimator::with_default_pricing(&thresholds).estimate(bytes);

    if estimate.estimation_error {
        return Err("negative byte count is not a valid estimate".into());
    }

    println!("bytes:            {}", estimate.bytes);
    println!("estimated cost:   ${:.6}", estimate.cost);
    println!("exceeds warning:  {}", estimate.exceeds_warning);
    println!("exceeds limit:    {}", estimate.exceeds_limit);
    Ok(())
}

fn check_config(path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let thresholds: CostThresholds = serde_json::from_str(&raw)?;
    thresholds.validate()?;
    println!("{} is valid", path.display());
    println!(
        "daily ${:.2} / monthly ${:.2} / per-query ${:.2}",
        thresholds.daily_limit, thresholds.monthly_limit, thresholds.query_cost_limit
    );
    Ok(())
}

fn ttl_table() -> Result<(), Box<dyn std::error::Error>> {
    let policy = TtlPolicy::default();
    let mut entries: Vec<_> = policy.entries().collect();
    entries.sort_by_key(|(category, _)| category.to_string());
    for (category, ttl) in entries {
        println!("{:<12} {}s", category.to_string(), ttl.as_secs());
    }
    println!("{:<12} {}s (fallback)", "default", policy.default_ttl().as_secs());
    Ok(())
}
