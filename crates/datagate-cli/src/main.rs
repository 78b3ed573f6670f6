use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use datagate_core::{
    Contract, HealthIndicator, PipelineConfig, RemediationOutcome, ReportStatus, RunReport, Severity,
};
use datagate_engine::{EvaluationRequest, FileBatchSource, Pipeline};
use datagate_registry::{ContractRepository, FileContractRepository, InMemoryLineage};
use datagate_store::JsonlBaselineStore;

/// Datagate - data quality gate for tabular batches
#[derive(Parser)]
#[command(name = "datagate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: datagate.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Contract repository directory
    #[arg(long, global = true, env = "DATAGATE_CONTRACTS", default_value = "contracts")]
    contracts: PathBuf,

    /// Lineage file (TOML)
    #[arg(long, global = true, env = "DATAGATE_LINEAGE")]
    lineage: Option<PathBuf>,

    /// Run history directory
    #[arg(long, global = true, env = "DATAGATE_HISTORY", default_value = ".datagate")]
    history: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a batch file against its dataset's contract
    Evaluate {
        /// Batch file (.csv or .json)
        file: String,

        /// Dataset the batch belongs to
        #[arg(short, long)]
        dataset: String,

        /// Run id (derived from the batch content if omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Output file for report.json
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,
    },

    /// Approve a contract document as the dataset's next version
    Approve {
        dataset: String,

        /// Contract TOML file
        contract: PathBuf,
    },

    /// List archived contract versions
    History { dataset: String },

    /// Re-publish an archived contract version
    Restore { dataset: String, version: u32 },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "datagate=debug" } else { "datagate=warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    match &cli.command {
        Commands::Evaluate {
            file,
            dataset,
            run_id,
            output,
        } => evaluate_command(&cli, config, file, dataset, run_id.as_deref(), output),
        Commands::Approve { dataset, contract } => approve_command(&cli, config, dataset, contract),
        Commands::History { dataset } => history_command(&cli, dataset),
        Commands::Restore { dataset, version } => restore_command(&cli, dataset, *version),
    }
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<PipelineConfig> {
    if let Some(path) = path {
        return PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    let default_path = Path::new("datagate.toml");
    if default_path.exists() {
        return PipelineConfig::from_file(default_path)
            .context("Failed to load datagate.toml");
    }

    if verbose {
        eprintln!("{}", "No config file found, using defaults".yellow());
    }
    tracing::debug!("no datagate.toml found; using default configuration");
    Ok(PipelineConfig::default())
}

fn open_contracts(cli: &Cli) -> Result<FileContractRepository> {
    FileContractRepository::open(&cli.contracts)
        .with_context(|| format!("Failed to open contract repository {}", cli.contracts.display()))
}

fn build_pipeline(cli: &Cli, config: PipelineConfig) -> Result<Pipeline> {
    let contracts = open_contracts(cli)?;
    let store = JsonlBaselineStore::open(&cli.history)
        .with_context(|| format!("Failed to open run history {}", cli.history.display()))?;

    let lineage = match &cli.lineage {
        Some(path) => InMemoryLineage::from_file(path)
            .with_context(|| format!("Failed to load lineage from {}", path.display()))?,
        None => InMemoryLineage::new(),
    };

    if cli.verbose {
        eprintln!("{} {}", "Contracts:".cyan(), cli.contracts.display());
        eprintln!("{} {}", "History:".cyan(), cli.history.display());
    }

    Ok(Pipeline::new(
        config,
        Arc::new(FileBatchSource::new()),
        Arc::new(contracts),
        Arc::new(store),
        Arc::new(lineage),
    ))
}

/// Evaluate command - run the pipeline over one batch
fn evaluate_command(
    cli: &Cli,
    config: PipelineConfig,
    file: &str,
    dataset: &str,
    run_id: Option<&str>,
    output: &Path,
) -> Result<()> {
    let pipeline = build_pipeline(cli, config)?;

    if cli.verbose {
        eprintln!("{} {} ({})", "Evaluating".cyan(), file, dataset);
    }

    let mut request = EvaluationRequest::new(file, dataset);
    if let Some(run_id) = run_id {
        request = request.with_run_id(run_id);
    }
    let report = pipeline.evaluate_request(&request);
    tracing::info!(
        dataset,
        run = %report.run_id,
        status = %report.status,
        output = %output.display(),
        "evaluation complete"
    );

    report
        .save_to_file(output)
        .with_context(|| format!("Failed to write report to {}", output.display()))?;
    if cli.verbose {
        eprintln!("{} {}", "Report saved to:".green(), output.display());
    }

    print_report_summary(&report);

    if let Some(draft) = &report.inferred_contract {
        let draft_path = write_contract(output, &format!("{}.draft.toml", dataset), draft)?;
        println!(
            "{} {} (review, then `datagate approve {} {}`)",
            "Drafted contract:".yellow().bold(),
            draft_path.display(),
            dataset,
            draft_path.display()
        );
    }

    if let Some(RemediationOutcome::PendingApproval { proposal }) = &report.remediation {
        let proposal_path = write_contract(output, &proposal_file_name(proposal), proposal)?;
        println!(
            "{} {} (review, then `datagate approve {} {}`)",
            "Proposed contract:".yellow().bold(),
            proposal_path.display(),
            dataset,
            proposal_path.display()
        );
    }

    if report.is_failure() {
        std::process::exit(1);
    }

    Ok(())
}

fn proposal_file_name(proposal: &Contract) -> String {
    format!("{}.v{}.proposal.toml", proposal.dataset_id, proposal.version)
}

/// Write a contract as TOML next to the report, returning its path
fn write_contract(report_path: &Path, file_name: &str, contract: &Contract) -> Result<PathBuf> {
    let path = report_path.with_file_name(file_name);
    let toml = contract
        .to_toml()
        .with_context(|| format!("Failed to serialize contract for '{}'", contract.dataset_id))?;
    std::fs::write(&path, toml).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), version = contract.version, "contract written for review");
    Ok(path)
}

/// Approve command - gate and publish a contract document
fn approve_command(cli: &Cli, config: PipelineConfig, dataset: &str, contract: &Path) -> Result<()> {
    let content = std::fs::read_to_string(contract)
        .with_context(|| format!("Failed to read {}", contract.display()))?;

    let pipeline = build_pipeline(cli, config)?;
    let result = pipeline.approve_contract(dataset, &content);

    if cli.verbose {
        eprintln!("{}", serde_json::to_string_pretty(&result)?);
    }

    match (result.accepted, result.version) {
        (true, Some(version)) => {
            tracing::info!(dataset, version, "contract approved");
            println!("{} {} is now at version {}", "✓".green(), dataset.bold(), version);
            Ok(())
        }
        _ => {
            tracing::warn!(dataset, reason = ?result.reason, "contract approval rejected");
            Err(anyhow::anyhow!(
                "Contract for '{}' rejected: {}",
                dataset,
                result.reason.unwrap_or_default()
            ))
        }
    }
}

/// History command - list archived versions
fn history_command(cli: &Cli, dataset: &str) -> Result<()> {
    let repo = open_contracts(cli)?;
    let active = repo.get(dataset).ok();
    let history = repo
        .history(dataset)
        .with_context(|| format!("Failed to read history for '{}'", dataset))?;

    println!("{} {}", "Dataset:".bold(), dataset.green());
    match &active {
        Some(contract) => println!(
            "{} {} ({:?})",
            "Active version:".bold(),
            contract.version,
            contract.lifecycle.status
        ),
        None => println!("{}", "No active contract".yellow()),
    }
    println!();

    if history.is_empty() {
        println!("No archived versions.");
    } else {
        println!("{}", "Archived versions:".bold());
        for entry in &history {
            println!(
                "  v{:<4} {}  {}",
                entry.version,
                entry.archived_at.format("%Y-%m-%d %H:%M:%S"),
                entry.location.dimmed()
            );
        }
    }

    Ok(())
}

/// Restore command - republish an archived version
fn restore_command(cli: &Cli, dataset: &str, version: u32) -> Result<()> {
    let repo = open_contracts(cli)?;
    let new_version = repo
        .restore(dataset, version)
        .with_context(|| format!("Failed to restore version {} of '{}'", version, dataset))?;
    tracing::info!(dataset, from = version, version = new_version, "contract restored");

    println!(
        "{} restored v{} of {} as version {}",
        "✓".green(),
        version,
        dataset.bold(),
        new_version
    );
    Ok(())
}

fn print_report_summary(report: &RunReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Data Quality Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Dataset:   {}", report.dataset_id);
    println!("Run:       {}", report.run_id);
    println!("Timestamp: {}", report.timestamp);

    let status = match report.status {
        ReportStatus::Pass => report.status.to_string().green().bold(),
        ReportStatus::PassWithWarnings => report.status.to_string().yellow().bold(),
        ReportStatus::Fail => report.status.to_string().red().bold(),
        ReportStatus::ContractMissing => report.status.to_string().cyan().bold(),
    };
    println!("Status:    {}", status);
    println!();

    println!("{}", "Stages:".bold());
    for entry in &report.execution_log {
        println!(
            "  {:<10} {:<16} {:>6}ms  {}",
            entry.stage.to_string(),
            entry.outcome.to_string(),
            entry.duration_ms,
            entry.summary.dimmed()
        );
    }
    println!();

    if !report.violations.is_empty() {
        println!("{}", "Violations:".bold());
        for violation in &report.violations {
            let severity = match violation.severity {
                Severity::Critical => "CRITICAL".red().bold(),
                Severity::Warning => "WARNING".yellow().bold(),
            };
            println!("  [{}] {}: {}", severity, violation.issue, violation.column);
            println!("    Expected: {}", violation.expected);
            println!("    Actual:   {}", violation.actual);
        }
        println!();
    }

    for error in &report.critical_errors {
        println!("{} {}", "✗".red(), error);
    }
    for warning in &report.warnings {
        println!("{} {}", "⚠".yellow(), warning);
    }
    if !report.critical_errors.is_empty() || !report.warnings.is_empty() {
        println!();
    }

    if let Some(priority) = &report.table_priority {
        println!(
            "{} {} ({} downstream)",
            "Priority:".bold(),
            priority.tier,
            priority.blast_radius.len()
        );
    }

    if let Some(health) = &report.health_indicator {
        print_health(health);
    }

    match &report.remediation {
        Some(RemediationOutcome::PendingApproval { proposal }) => println!(
            "{} version {} proposed, awaiting approval",
            "Remediation:".bold(),
            proposal.version
        ),
        Some(RemediationOutcome::Applied { version, backup }) => println!(
            "{} version {} applied (backup: {})",
            "Remediation:".bold(),
            version,
            backup
        ),
        Some(RemediationOutcome::Rejected { gate, reason }) => println!(
            "{} rejected by {}: {}",
            "Remediation:".bold(),
            gate,
            reason
        ),
        None => {}
    }

    if !report.quarantine_candidates.is_empty() {
        println!(
            "{} {} row(s) flagged for review",
            "Quarantine:".bold(),
            report.quarantine_candidates.len()
        );
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

fn print_health(health: &HealthIndicator) {
    let score = format!("{:.1}", health.score);
    let score = if health.score >= 90.0 {
        score.green().bold()
    } else if health.score >= 70.0 {
        score.yellow().bold()
    } else {
        score.red().bold()
    };

    println!(
        "{} {} ({:?}, risk {:?})",
        "Trust score:".bold(),
        score,
        health.status,
        health.risk_assessment
    );
    println!("  {}", health.summary);
    if health.safe_to_use {
        println!("  {}", "✓ Safe to use".green());
    } else {
        println!("  {}", "✗ Not safe to use".red());
    }
    for recommendation in &health.recommendations {
        println!("  - {}", recommendation);
    }
}
