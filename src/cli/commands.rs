//! Command implementation for the cardflow CLI
//!
//! Builds the run configuration from the arguments, wires the coordinator
//! to the external converter and reports the outcome.

use crate::cli::args::{Args, OutputFormat};
use crate::config::PipelineConfig;
use crate::constants::BYTES_PER_MIB;
use crate::header::UnknownSourcePolicy;
use crate::logging::TracingLogger;
use crate::models::{Routing, RoutingTable, RunOutcome, RunReport};
use crate::pipeline::PipelineCoordinator;
use crate::sites::SiteTable;
use crate::transform::ExternalConverter;
use anyhow::{Context, Result};
use colored::*;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of a CLI invocation
#[derive(Debug)]
pub enum CommandOutcome {
    /// Scan only; nothing was moved
    DryRun { valid: usize, invalid: usize },
    Run(RunReport),
}

impl CommandOutcome {
    /// Process exit code: non-zero when the run aborted or files stayed staged
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandOutcome::DryRun { .. } => 0,
            CommandOutcome::Run(report) if report.is_aborted() || !report.fully_restored() => 1,
            CommandOutcome::Run(_) => 0,
        }
    }
}

/// Main command runner
pub async fn run(args: Args, cancel: CancellationToken) -> Result<CommandOutcome> {
    setup_logging(&args)?;
    debug!("Command line arguments: {:?}", args);

    let config = build_config(&args)?;
    let sites = build_site_table(&args);
    debug!("Loaded configuration: {:?}", config);

    let converter = ExternalConverter::new(
        config.converter.clone(),
        TracingLogger::shared("converter"),
    );
    let coordinator = PipelineCoordinator::new(
        config,
        sites,
        converter,
        TracingLogger::shared("pipeline"),
    )
    .context("Invalid configuration")?
    .with_cancellation(cancel)
    .with_progress(args.show_progress());

    if args.dry_run {
        let table = coordinator
            .scan(&args.source_dir)
            .await
            .with_context(|| format!("Failed to scan {}", args.source_dir.display()))?;
        report_routing(&args, &table, coordinator.config())?;
        return Ok(CommandOutcome::DryRun {
            valid: table.valid_count(),
            invalid: table.invalid_count(),
        });
    }

    info!("Ingesting storage card {}", args.source_dir.display());
    let report = coordinator
        .run(&args.source_dir)
        .await
        .with_context(|| format!("Failed to process {}", args.source_dir.display()))?;

    match args.output_format {
        OutputFormat::Human => generate_human_report(&report),
        OutputFormat::Json => generate_json_report(&report)?,
    }

    Ok(CommandOutcome::Run(report))
}

/// Set up structured logging based on CLI arguments
fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cardflow={}", log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if args.quiet {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    installed.context("Failed to initialize logging")?;

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

/// Defaults anchored next to the card, then CLI overrides on top
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::default().anchored_at(card_parent(&args.source_dir));
    apply_cli_overrides(&mut config, args);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn card_parent(source_dir: &Path) -> &Path {
    source_dir
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Apply CLI argument overrides to configuration
fn apply_cli_overrides(config: &mut PipelineConfig, args: &Args) {
    if let Some(dest) = &args.dest {
        config.destination_template = dest.clone();
    }
    if let Some(standardized) = &args.standardized {
        config.standardized_template = standardized.clone();
    }
    if let Some(converter) = &args.converter {
        config.converter.program = converter.clone();
    }
    if let Some(mb) = args.split_threshold_mb {
        config.split_threshold_bytes = mb.saturating_mul(BYTES_PER_MIB);
    }

    config.workers = args.workers;
    config.split_enabled = !args.no_split;
    config.standardize_enabled = !args.no_standardize;
    if args.allow_unknown_sites {
        config.unknown_sources = UnknownSourcePolicy::Accept;
    }
}

fn build_site_table(args: &Args) -> SiteTable {
    let mut sites = SiteTable::builtin();
    for (serial, code) in &args.sites {
        sites.insert(serial.clone(), code.clone());
    }
    debug!("Site table holds {} loggers", sites.len());
    sites
}

fn report_routing(args: &Args, table: &RoutingTable, config: &PipelineConfig) -> Result<()> {
    match args.output_format {
        OutputFormat::Json => {
            let records: Vec<serde_json::Value> = table
                .records()
                .map(|record| match &record.routing {
                    Routing::Valid {
                        header,
                        destination_name,
                    } => serde_json::json!({
                        "source": record.source_path,
                        "size_bytes": record.size_bytes,
                        "valid": true,
                        "site": header.site.label(),
                        "serial": header.serial,
                        "table": header.table,
                        "timestamp": header.timestamp,
                        "staged_name": destination_name,
                        "destination_dir": config.destination_dir(header.site.label()),
                    }),
                    Routing::Invalid { reason, detail } => serde_json::json!({
                        "source": record.source_path,
                        "size_bytes": record.size_bytes,
                        "valid": false,
                        "reason": reason.to_string(),
                        "detail": detail,
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        OutputFormat::Human => {
            println!("\n{}", "Dry Run: Routing Table".bright_green().bold());
            for batch in table.site_batches() {
                println!(
                    "  {} {} ({} files, {} bytes) -> {}",
                    "Site".bright_cyan(),
                    batch.site.label().bright_white().bold(),
                    batch.len(),
                    batch.total_bytes(),
                    config.destination_dir(batch.site.label()).display()
                );
                for record in &batch.records {
                    println!(
                        "    {} -> {}",
                        record.source_path.display(),
                        record.destination_name().unwrap_or_default()
                    );
                }
            }
            for record in table.records().filter(|record| !record.is_valid()) {
                if let Routing::Invalid { reason, detail } = &record.routing {
                    println!(
                        "  {} {} ({}: {})",
                        "Excluded".bright_red(),
                        record.source_path.display(),
                        reason,
                        detail
                    );
                }
            }
            println!(
                "  {} {} valid, {} invalid",
                "Total:".bright_cyan(),
                table.valid_count().to_string().bright_white(),
                table.invalid_count().to_string().bright_white()
            );
        }
    }
    Ok(())
}

fn generate_human_report(report: &RunReport) {
    let title = match &report.outcome {
        RunOutcome::Completed => "Ingestion Summary".bright_green().bold(),
        RunOutcome::NoOp => "Nothing To Ingest".bright_yellow().bold(),
        RunOutcome::Aborted { .. } => "Ingestion Aborted".bright_red().bold(),
    };
    println!("\n{}", title);

    if let RunOutcome::Aborted { stage, reason } = &report.outcome {
        println!("  {} {} ({})", "Stopped at:".bright_red(), stage, reason);
    }
    println!(
        "  {} {}ms",
        "Time elapsed:".bright_cyan(),
        report.elapsed.as_millis().to_string().bright_white()
    );
    println!(
        "  {} {} ({} valid, {} excluded)",
        "Files scanned:".bright_cyan(),
        report.files_scanned.to_string().bright_white(),
        report.files_valid,
        report.files_invalid
    );
    if !report.sites.is_empty() {
        println!("  {} {}", "Sites:".bright_cyan(), report.sites.join(", "));
    }
    println!(
        "  {} {} staged, {} restored",
        "Card files:".bright_cyan(),
        report.files_staged,
        report.files_restored
    );
    println!(
        "  {} {} converted, {} split parts, {} standardized",
        "Outputs:".bright_cyan(),
        report.converted_outputs.len().to_string().bright_white().bold(),
        report.split_parts,
        report.standardized_files
    );
    if report.oversized_skipped > 0 {
        println!(
            "  {} {}",
            "Too large to standardize:".bright_yellow(),
            report.oversized_skipped
        );
    }
    if report.task_failures + report.transform_failures > 0 {
        println!(
            "  {} {} site conversions, {} file transforms",
            "Failures:".bright_red(),
            report.task_failures.to_string().bright_red().bold(),
            report.transform_failures.to_string().bright_red().bold()
        );
    }
    if report.restore_failures > 0 {
        println!(
            "  {} {} files are still in staging directories under {}",
            "RESTORE FAILED:".bright_red().bold(),
            report.restore_failures.to_string().bright_red().bold(),
            report.source_dir.display()
        );
    }
    println!();
}

fn generate_json_report(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
