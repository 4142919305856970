//! Fare-Ripple main entry point
//!
//! This is the command-line interface for the Fare-Ripple fare crawler.

use clap::Parser;
use fare_ripple::config::{load_config_with_hash, Config};
use fare_ripple::crawler::run_crawl;
use fare_ripple::output::print_run_summary;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Fare-Ripple: a concurrent airline fare crawler
///
/// Fare-Ripple queries a flight-search GraphQL endpoint for every configured
/// route, pairs outbound and return legs into fare records, and stores them
/// in a SQLite database.
#[derive(Parser, Debug)]
#[command(name = "fare-ripple")]
#[command(version = "1.0.0")]
#[command(about = "A concurrent airline fare crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show which routes would be crawled
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, &config_hash).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("fare_ripple=info,warn"),
            1 => EnvFilter::new("fare_ripple=debug,info"),
            2 => EnvFilter::new("fare_ripple=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the validated config and its routes
fn handle_dry_run(config: &Config) {
    println!("=== Fare-Ripple Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Max concurrency: {}", config.crawler.max_concurrency);
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!(
        "  Backoff: {}ms doubling, capped at {}ms",
        config.crawler.backoff_base_ms, config.crawler.backoff_cap_ms
    );
    println!("  Response date format: {}", config.crawler.date_format);
    println!("  Empty results: {:?}", config.crawler.empty_results);

    println!("\nAPI:");
    println!("  Endpoint: {}", config.api.endpoint);
    println!("  User agent: {}", config.api.user_agent);
    println!(
        "  Timeouts: {}s request, {}s connect",
        config.api.timeout_secs, config.api.connect_timeout_secs
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nRoutes ({}):", config.routes.len());
    for route in &config.routes {
        let task = route.to_task();
        match &route.return_date {
            Some(return_date) => println!(
                "  - [{}] {} -> {} on {}, returning {}",
                task.id, route.origin, route.destination, route.departure_date, return_date
            ),
            None => println!(
                "  - [{}] {} -> {} on {}",
                task.id, route.origin, route.destination, route.departure_date
            ),
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would crawl {} routes", config.routes.len());
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use fare_ripple::output::{load_statistics, print_statistics};
    use fare_ripple::storage::SqliteSink;
    use std::path::Path;

    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteSink::open_existing(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Crawling {} routes against {}",
        config.routes.len(),
        config.api.endpoint
    );

    // Ctrl-C stops dispatching; in-flight tasks finish
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing in-flight tasks");
                shutdown.cancel();
            }
        });
    }

    match run_crawl(config, config_hash, shutdown).await {
        Ok(summary) => {
            tracing::info!("Crawl finished");
            print_run_summary(&summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
