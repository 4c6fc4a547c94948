#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand};
use prognos::config::ExperimentConfig;
use prognos::run_experiment;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "prognos",
    version,
    about = "Cross-validated model evaluation for clinical tabular cohorts",
    long_about = "Trains RFreg, RFclass or LogReg models on a feature/outcome cohort, \
                  validates them with 5-fold cross-validation, tests them on held-out \
                  patients and appends the results to a cumulative log."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one experiment described by a TOML config file
    #[command(about = "Run an experiment (outputs: results log, optional search log)")]
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the experiment TOML file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Run a grid search over the parameter candidates before evaluating
    #[arg(long)]
    optimize: bool,

    /// Metric maximized by the grid search (e.g. r2, accuracy, f1_macro)
    #[arg(long, value_name = "NAME")]
    scoring: Option<String>,

    /// Results log to append to
    #[arg(long, value_name = "PATH")]
    results: Option<PathBuf>,

    /// Search log to write when optimizing
    #[arg(long, value_name = "PATH")]
    search_log: Option<PathBuf>,
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut config = ExperimentConfig::load(&args.config)?;
    if args.optimize {
        config.model.optimize = true;
    }
    if let Some(scoring) = args.scoring {
        config.model.scoring = Some(scoring);
    }
    if let Some(results) = args.results {
        config.output.results = results;
    }
    if let Some(search_log) = args.search_log {
        config.output.search_log = search_log;
    }

    let outcome = run_experiment(&config)?;

    println!();
    println!("Method:     {}", outcome.method);
    println!("Parameters: {}", outcome.params);
    println!("Results appended to {}", config.output.results.display());
    if config.model.optimize {
        println!("Search log written to {}", config.output.search_log.display());
    }
    log::info!("Finished in {:.2?}", start.elapsed());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Commands::Run(args) => run(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
