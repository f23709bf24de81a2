//! Command-line interface for the failover tester.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::report::ReportFormat;

/// Run a cross-datacenter failover test and report RTO and RPO.
#[derive(Parser, Debug)]
#[command(name = "failover-tester")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Test scenario file
    #[arg(short, long, env = "FAILOVER_TESTER_SCENARIO")]
    pub scenario: PathBuf,

    /// Configuration file path
    #[arg(short, long, env = "FAILOVER_TESTER_CONFIG", default_value = "config/config.yaml")]
    pub config: PathBuf,

    /// Report formats to generate
    #[arg(short, long, value_enum, default_value_t = ReportSelection::Junit)]
    pub report: ReportSelection,

    /// Log level (DEBUG, INFO, WARNING, ERROR, CRITICAL); overrides the config file
    #[arg(short, long, env = "FAILOVER_TESTER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Directory for reports, logs and run metrics
    #[arg(short, long, default_value = "results")]
    pub output_dir: PathBuf,

    /// Leave injected faults in place after the run
    #[arg(long)]
    pub skip_cleanup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportSelection {
    Junit,
    Html,
    Json,
    Both,
    All,
    None,
}

impl ReportSelection {
    pub fn formats(&self) -> Vec<ReportFormat> {
        match self {
            ReportSelection::Junit => vec![ReportFormat::Junit],
            ReportSelection::Html => vec![ReportFormat::Html],
            ReportSelection::Json => vec![ReportFormat::Json],
            ReportSelection::Both => vec![ReportFormat::Junit, ReportFormat::Html],
            ReportSelection::All => vec![ReportFormat::Junit, ReportFormat::Html, ReportFormat::Json],
            ReportSelection::None => Vec::new(),
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
