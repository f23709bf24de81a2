//! Failover tester - main entry point.

use anyhow::Context;
use failover_tester::cli::Cli;
use failover_tester::config::{TestScenario, TesterConfig};
use failover_tester::observability;
use failover_tester::orchestrator::{RunOptions, TestResult};
use failover_tester::report::ReportGenerator;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Fatal error");
            eprintln!("Fatal error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating output directory {}", cli.output_dir.display()))?;

    let config = TesterConfig::from_file(&cli.config).context("loading configuration")?;

    observability::init(
        &config.logging,
        cli.log_level.as_deref(),
        Some(&cli.output_dir.join("test_run.log")),
    )?;
    let metrics = observability::install_metrics_recorder()?;

    let scenario = TestScenario::from_file(&cli.scenario).context("loading test scenario")?;
    info!(
        test_id = %scenario.test_id,
        description = %scenario.description,
        "Loaded test scenario"
    );

    let options = RunOptions {
        skip_cleanup: cli.skip_cleanup,
    };
    let result = failover_tester::run(config, scenario, options).await?;

    let reports = ReportGenerator::new(&cli.output_dir)?;
    for format in cli.report.formats() {
        match reports.generate(format, &result) {
            Ok(path) => info!(format = ?format, path = %path.display(), "Report generated"),
            Err(e) => error!(format = ?format, error = %e, "Failed to generate report"),
        }
    }

    let metrics_path = cli.output_dir.join(format!("{}_metrics.prom", result.test_id));
    if let Err(e) = observability::write_metrics(&metrics, &metrics_path) {
        warn!(error = %e, "Failed to write run metrics");
    }

    print_summary(&result);
    Ok(result.success)
}

fn print_summary(result: &TestResult) {
    println!("Test {}: {}", result.test_id, if result.success { "PASSED" } else { "FAILED" });
    match result.rto_seconds {
        Some(rto) => println!("  RTO: {:.2} seconds", rto),
        None => println!("  RTO: N/A"),
    }
    match result.rpo_events {
        Some(rpo) => println!("  RPO: {} events", rpo),
        None => println!("  RPO: N/A"),
    }
    for issue in &result.issues {
        println!("  - {}", issue);
    }
}
