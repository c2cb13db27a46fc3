use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spanmeta_catalog::SpannerSource;
use spanmeta_core::{
    Config, DestinationKind, Disposition, RunReport, SinkOutcome, TargetStatus, QUERY_SET_VERSION,
};
use spanmeta_engine::{HarvestContext, HarvestOptions, Harvester, RetryPolicy, RetryingSource};
use spanmeta_sink::{BigQuerySink, JsonlSink, MetadataSink, TableLayout};

const DEFAULT_CONFIG: &str = "spanmeta.toml";

/// spanmeta - Harvest Spanner INFORMATION_SCHEMA metadata into BigQuery
#[derive(Parser)]
#[command(name = "spanmeta")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: spanmeta.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract catalog metadata from every target and write it to the destination
    Harvest {
        /// Write disposition (replace or append)
        #[arg(short, long)]
        disposition: Option<Disposition>,

        /// Write newline-delimited JSON files to this directory instead of BigQuery
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output file for the run report
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Number of targets extracted at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Exit successfully even if some targets failed
        #[arg(long)]
        allow_partial: bool,
    },

    /// Validate and list the target registry
    Targets,

    /// Print the catalog queries run against every target
    Queries,

    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check that the destination is reachable and writable
    CheckDestination {
        /// Check a local output directory instead of BigQuery
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref();
    let verbose = cli.verbose;

    match cli.command {
        Commands::Harvest {
            disposition,
            output_dir,
            report,
            concurrency,
            allow_partial,
        } => {
            let mut config = prepare_config(config_path, verbose)?;
            if let Some(disposition) = disposition {
                config.harvest.disposition = disposition;
            }
            if let Some(concurrency) = concurrency {
                config.harvest.concurrency = concurrency;
            }
            use_output_dir(&mut config, output_dir);
            harvest_command(&config, report.as_deref(), allow_partial, verbose).await
        }
        Commands::Targets => targets_command(&prepare_config(config_path, verbose)?),
        Commands::Queries => queries_command(&prepare_config(config_path, verbose)?),
        Commands::Init { force } => {
            init_command(config_path.unwrap_or(Path::new(DEFAULT_CONFIG)), force)
        }
        Commands::CheckDestination { output_dir } => {
            let mut config = prepare_config(config_path, verbose)?;
            use_output_dir(&mut config, output_dir);
            check_destination_command(&config, verbose).await
        }
    }
}

/// Default log directives when `RUST_LOG` is unset
///
/// The Spanner client reports background session failures only through its
/// own log target, so warnings from it stay visible.
fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!(
        "spanmeta={0},spanmeta_catalog={0},spanmeta_sink={0},spanmeta_engine={0},google_cloud_spanner=warn",
        level
    )
}

/// Logs go to stderr; `RUST_LOG` takes precedence over `--verbose`
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load the config file and apply environment overrides
fn prepare_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    let mut config = load_config(path, verbose)?;
    config
        .apply_env_overrides(|key| std::env::var(key).ok())
        .context("Invalid environment override")?;
    tracing::debug!(
        destination = ?config.destination.kind,
        targets = config.targets.len(),
        "configuration loaded"
    );
    Ok(config)
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    let config = if let Some(config_path) = path {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else if Path::new(DEFAULT_CONFIG).exists() {
        Config::from_file(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG))?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };
    Ok(config)
}

fn use_output_dir(config: &mut Config, output_dir: Option<PathBuf>) {
    if let Some(dir) = output_dir {
        config.destination.kind = DestinationKind::Jsonl;
        config.destination.output_dir = Some(dir);
    }
}

/// Build the configured destination
async fn build_sink(config: &Config) -> Result<Arc<dyn MetadataSink>> {
    let layout = TableLayout::from_config(&config.destination, &config.harvest.query_set());

    match config.destination.kind {
        DestinationKind::BigQuery => {
            let sink = BigQuerySink::connect(&config.destination, layout)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to BigQuery: {}", e))?;
            Ok(Arc::new(sink))
        }
        DestinationKind::Jsonl => {
            let dir = config
                .destination
                .output_dir
                .clone()
                .ok_or_else(|| anyhow::anyhow!("destination.output_dir is required for jsonl"))?;
            Ok(Arc::new(JsonlSink::new(dir, layout)))
        }
    }
}

/// Harvest command - run the pipeline over the whole registry
async fn harvest_command(
    config: &Config,
    report_path: Option<&Path>,
    allow_partial: bool,
    verbose: bool,
) -> Result<()> {
    config.validate()?;
    let registry = config.registry()?;

    if registry.is_empty() {
        return Err(anyhow::anyhow!(
            "No targets configured. Add [[targets]] entries to {} or set targets_file.",
            DEFAULT_CONFIG
        ));
    }

    if verbose {
        eprintln!(
            "{} {} targets across {} projects",
            "Harvesting".cyan(),
            registry.len(),
            registry.projects().len()
        );
    }

    let query_set = config.harvest.query_set();
    let source = RetryingSource::new(
        SpannerSource::new(query_set),
        RetryPolicy::from_config(&config.harvest.retry),
    );
    let sink = build_sink(config).await?;

    let harvester = Harvester::new(HarvestContext {
        source: Arc::new(source),
        sink,
        options: HarvestOptions::from_config(&config.harvest),
    });

    let report = harvester.run(&registry).await;

    if let Some(path) = report_path {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        if verbose {
            eprintln!("{} {}", "Run report saved to:".green(), path.display());
        }
    }

    print_run_summary(&report);

    if report.sink_failed() {
        std::process::exit(1);
    }
    if report.has_failures() && !allow_partial {
        std::process::exit(2);
    }

    Ok(())
}

/// Targets command - validate and list the registry
fn targets_command(config: &Config) -> Result<()> {
    let registry = config.registry()?;

    println!("{}", "Target Registry".bold().bright_blue());
    println!();

    if registry.is_empty() {
        println!("{}", "No targets configured".yellow());
        return Ok(());
    }

    for (i, target) in registry.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, target.database_path());
    }

    println!();
    println!(
        "{} {} targets across {} projects",
        "✓".green(),
        registry.len(),
        registry.projects().len()
    );
    Ok(())
}

/// Queries command - print the query set
fn queries_command(config: &Config) -> Result<()> {
    let query_set = config.harvest.query_set();

    println!("{} v{}", "Query set".bold().bright_blue(), QUERY_SET_VERSION);
    println!("Digest: {}", query_set.digest());
    println!();

    for (view, sql) in query_set.queries() {
        println!(
            "{} -> {}",
            view.information_schema_name().cyan(),
            config.destination.table_for(view)
        );
        println!("  {}", sql);
        println!();
    }
    Ok(())
}

/// Init command - write a starter configuration
fn init_command(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow::anyhow!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        ));
    }

    std::fs::write(path, Config::starter_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{} {}", "Created".green(), path.display());
    println!("Edit [destination] and [[targets]], then run 'spanmeta harvest'.");
    Ok(())
}

/// Check destination command - test sink connectivity
async fn check_destination_command(config: &Config, verbose: bool) -> Result<()> {
    config.validate()?;

    let sink = build_sink(config).await?;
    if verbose {
        eprintln!("{} {}...", "Testing".cyan(), sink.name());
    }

    sink.test_connection()
        .await
        .map_err(|e| anyhow::anyhow!("Destination check failed: {}", e))?;

    println!("{} {} destination is reachable", "✓".green(), sink.name());
    Ok(())
}

/// Print a human-readable run summary
fn print_run_summary(report: &RunReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Spanner Metadata Harvest".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Run: {}", report.run_id);
    println!("Disposition: {}", report.disposition);
    let digest: String = report.query_set_digest.chars().take(12).collect();
    println!("Query set: v{} ({})", report.query_set_version, digest);
    println!();

    println!("{}", "Summary:".bold());
    println!("  Targets:   {}", report.summary.targets_total);
    println!("  Succeeded: {}", format!("{}", report.summary.succeeded).green());
    if report.summary.failed > 0 {
        println!("  Failed:    {}", format!("{}", report.summary.failed).red().bold());
    } else {
        println!("  Failed:    {}", format!("{}", report.summary.failed).green());
    }
    println!("  Rows extracted: {}", report.summary.rows_extracted);
    println!("  Rows written:   {}", report.summary.rows_written);
    println!();

    println!("{}", "Targets:".bold());
    for result in &report.results {
        match result.status {
            TargetStatus::Succeeded => println!(
                "  [{}] {} ({} rows, {} ms)",
                "OK".green().bold(),
                result.target,
                result.row_count,
                result.duration_ms
            ),
            TargetStatus::Failed => {
                println!("  [{}] {}", "FAILED".red().bold(), result.target);
                if let Some(error) = &result.error {
                    println!("    {}: {}", error.kind, error.message);
                }
            }
        }
    }
    println!();

    match &report.sink {
        SinkOutcome::Written { rows } => {
            println!("{} {} rows written", "✓".green().bold(), rows.total);
            for (table, count) in &rows.tables {
                println!("    {}: {}", table, count);
            }
        }
        SinkOutcome::Failed { error } => {
            println!("{} Sink failed, nothing was written: {}", "✗".red().bold(), error);
        }
        SinkOutcome::Skipped { reason } => {
            println!("{} Sink skipped: {}", "!".yellow().bold(), reason);
        }
        SinkOutcome::Pending => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_harvest_flags() {
        let cli = Cli::try_parse_from([
            "spanmeta",
            "harvest",
            "--disposition",
            "append",
            "--concurrency",
            "4",
            "--allow-partial",
        ])
        .unwrap();

        match cli.command {
            Commands::Harvest {
                disposition,
                concurrency,
                allow_partial,
                ..
            } => {
                assert_eq!(disposition, Some(Disposition::Append));
                assert_eq!(concurrency, Some(4));
                assert!(allow_partial);
            }
            _ => panic!("Expected harvest command"),
        }
    }

    #[test]
    fn rejects_unknown_disposition() {
        assert!(Cli::try_parse_from(["spanmeta", "harvest", "--disposition", "upsert"]).is_err());
    }

    #[test]
    fn default_directives_keep_spanner_client_warnings() {
        let directives = default_directives(false);
        assert!(directives.contains("spanmeta=info"));
        assert!(directives.contains("google_cloud_spanner=warn"));
        assert!(default_directives(true).contains("spanmeta_catalog=debug"));

        // Parses as a filter
        let _ = EnvFilter::new(directives);
    }

    #[test]
    fn output_dir_switches_to_jsonl() {
        let mut config = Config::default();
        use_output_dir(&mut config, Some(PathBuf::from("out")));
        assert_eq!(config.destination.kind, DestinationKind::Jsonl);
        assert_eq!(config.destination.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spanmeta.toml");

        init_command(&path, false).unwrap();
        assert!(init_command(&path, false).is_err());
        init_command(&path, true).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.targets.len(), 1);
    }

    #[tokio::test]
    async fn jsonl_sink_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        use_output_dir(&mut config, Some(dir.path().to_path_buf()));

        let sink = build_sink(&config).await.unwrap();
        assert_eq!(sink.name(), "Jsonl");
        sink.test_connection().await.unwrap();
    }
}
