//! Synod Harness - agreement testing for the Synod replicated log
//!
//! This CLI tool drives an in-process cluster through fault scenarios:
//! - `run` - Run one scenario and write its results
//! - `suite` - Run every scenario
//! - `list` - List the predefined scenarios

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use synod_harness::scenarios;
use synod_harness::workload::WorkloadPattern;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "synod-harness")]
#[command(about = "Fault-injection agreement testing for Synod consensus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test scenario
    Run {
        /// Scenario to run
        #[arg(short, long, default_value = "happy")]
        scenario: String,

        /// Number of nodes in the cluster (scenario default if omitted)
        #[arg(short, long)]
        nodes: Option<usize>,

        /// Number of operations to execute
        #[arg(short, long, default_value = "100")]
        operations: usize,

        /// Seed for the network, workload and fault RNGs
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Workload pattern (write-heavy, mixed, read-heavy, single-key)
        #[arg(short, long)]
        workload: Option<WorkloadPattern>,

        /// Output directory for results
        #[arg(short = 'd', long, default_value = "./results")]
        output_dir: PathBuf,

        /// Path to write performance metrics JSON
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },

    /// Run the full test suite
    Suite {
        /// Number of operations per scenario
        #[arg(short = 'n', long, default_value = "100")]
        operations: usize,

        /// Seed shared by every scenario
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Workload pattern forced on every scenario
        #[arg(short, long)]
        workload: Option<WorkloadPattern>,

        /// Output directory for results
        #[arg(short, long, default_value = "./results")]
        output_dir: PathBuf,

        /// Output JUnit XML file
        #[arg(long)]
        junit_xml: Option<PathBuf>,
    },

    /// List predefined scenarios
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            nodes,
            operations,
            seed,
            workload,
            output_dir,
            metrics_file,
        } => {
            let mut scenario_config = scenarios::get_scenario(&scenario)?;
            if let Some(pattern) = workload {
                scenario_config = scenario_config.with_workload(pattern);
            }
            let nodes = nodes.unwrap_or(scenario_config.recommended_nodes);
            info!("Running scenario: {} with {} nodes, {} operations", scenario, nodes, operations);

            let results = scenarios::run_scenario(&scenario_config, nodes, operations, seed)?;

            let summary_path = scenarios::write_results(&output_dir, &results)?;
            info!("Summary written to: {}", summary_path.display());

            // Write metrics if requested
            if let Some(ref metrics_path) = metrics_file {
                let metrics = serde_json::json!({
                    "scenario": results.scenario,
                    "summary": results.metrics,
                    "message_counts": results.message_counts,
                });
                std::fs::write(metrics_path, serde_json::to_string_pretty(&metrics)?)?;
                info!("Metrics written to: {}", metrics_path.display());
            }

            let summary = &results.metrics;
            println!("\nScenario {}:", results.scenario);
            println!("  Submitted: {} ({} rejected)", results.submitted, results.rejected);
            println!("  Decided instances: {}", results.check.decided);
            println!("  Steps: {}", results.steps);
            println!("  Latency (min/avg/max): {}/{:.1}/{} steps",
                summary.min_latency_steps, summary.avg_latency_steps, summary.max_latency_steps);
            println!("  Latency p50/p95/p99: {}/{}/{} steps",
                summary.p50_latency_steps, summary.p95_latency_steps, summary.p99_latency_steps);
            println!("  Messages sent/dropped/duplicated: {}/{}/{}",
                summary.messages_sent, summary.dropped, summary.duplicated);
            println!("  Converged: {}", results.converged);
            for violation in &results.check.violations {
                println!("  VIOLATION: {}", violation);
            }

            if !results.passed() {
                std::process::exit(1);
            }
        }

        Commands::Suite {
            operations,
            seed,
            workload,
            output_dir,
            junit_xml,
        } => {
            info!("Running full test suite");

            let results = scenarios::run_suite(None, operations, seed, workload)?;
            let suite_path = scenarios::write_suite(&output_dir, &results)?;
            info!("Suite results written to: {}", suite_path.display());

            // Print summary
            println!("\nTest Suite Results ({}):", results.run_id);
            println!("  Total: {}", results.total);
            println!("  Passed: {}", results.passed);
            println!("  Failed: {}", results.failed);

            // Write JUnit XML if requested
            if let Some(xml_path) = junit_xml {
                let xml = results.to_junit_xml();
                std::fs::write(&xml_path, xml)?;
                info!("JUnit XML written to: {}", xml_path.display());
            }

            if results.failed > 0 {
                std::process::exit(1);
            }
        }

        Commands::List => {
            for name in scenarios::list_scenarios() {
                let config = scenarios::get_scenario(name)?;
                println!("{:<12} {}", name, config.description);
            }
        }
    }

    Ok(())
}
