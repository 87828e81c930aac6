//! mtd-shuffler: moving target defense controller core
//!
//! This is the main entry point for the shuffling daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! ./mtd-shuffler
//!
//! # Run with custom configuration
//! ./mtd-shuffler -c /path/to/config.json
//!
//! # Run with environment overrides
//! MTD_LOG_LEVEL=debug MTD_SHUFFLE_POLICY=uniform ./mtd-shuffler
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use mtd_shuffler::config::{create_default_config, load_config_with_env, Config, DEFAULT_CONFIG_PATH};
use mtd_shuffler::diagnostics::{log_mapping, spawn_mapping_monitor};
use mtd_shuffler::flow::FlowRulePolicy;
use mtd_shuffler::{AddressMappingTable, MtdController, RuleUpdate, ShufflingScheduler};

/// Capacity of the rule update channel
const RULE_UPDATE_CHANNEL_SIZE: usize = 64;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("mtd-shuffler v{}", mtd_shuffler::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"mtd-shuffler v{}

Moving target defense: periodic virtual address shuffling with DNS rewriting.

USAGE:
    mtd-shuffler [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: {}]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration, print the initial flow rules and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    MTD_LOG_LEVEL        Override log level (trace, debug, info, warn, error)
    MTD_SHUFFLE_POLICY   Override shuffle policy (uniform, priority)
    MTD_POOL_RANGE       Override virtual address pool (CIDR)
    MTD_DNS_RESOLVER     Override DNS resolver address (empty to match any source)
"#,
        mtd_shuffler::VERSION,
        DEFAULT_CONFIG_PATH
    );
}

/// Initialize logging
fn init_logging(config: &Config) -> Result<()> {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse()?);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

/// Build the mapping table and pool from configuration
fn bootstrap(config: &Config) -> Result<(Arc<AddressMappingTable>, Arc<mtd_shuffler::AddressPool>)> {
    let pool = Arc::new(config.pool.build());
    let table = AddressMappingTable::bootstrap(&config.host_specs(), &pool)
        .map_err(|e| anyhow::anyhow!("Failed to build address mapping: {e}"))?;
    Ok((Arc::new(table), pool))
}

/// Log rule updates until the channel closes.
///
/// Stands in for a switch adapter; an adapter consumes the same channel.
async fn drain_rule_updates(mut updates: mpsc::Receiver<RuleUpdate>) {
    while let Some(update) = updates.recv().await {
        for command in &update.commands {
            info!(switch = %update.switch, command = ?command, "Rule update");
        }
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    // Parse arguments
    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    // Load configuration
    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!("Failed to load configuration from {:?}: {e}", args.config_path)
    })?;

    // Handle check-config
    if args.check_config {
        let (table, _) = bootstrap(&config)?;
        let policy = FlowRulePolicy::new(config.dns.flow_policy_config());
        let rules = policy.initial_rules(&table.all_virtual_addresses());
        println!("Configuration is valid");
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    // Initialize logging
    init_logging(&config)?;

    info!("mtd-shuffler v{}", mtd_shuffler::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let (table, pool) = bootstrap(&config)?;
    log_mapping(&table);

    // Shuffling loops
    let scheduler = Arc::new(ShufflingScheduler::new(
        Arc::clone(&table),
        pool,
        config.scheduler_config(),
    ));
    let scheduler_handle = scheduler.spawn();
    info!(
        policy = scheduler.config().policy.name(),
        loops = scheduler_handle.len(),
        "Shuffling started"
    );

    // Controller and rule synchronisation
    let controller = Arc::new(MtdController::new(
        Arc::clone(&table),
        FlowRulePolicy::new(config.dns.flow_policy_config()),
        config.dns.rewriter(),
    ));
    let (shutdown_tx, _) = broadcast::channel(1);
    let (update_tx, update_rx) = mpsc::channel(RULE_UPDATE_CHANNEL_SIZE);
    let sync_handle = controller.spawn_rule_sync(update_tx, shutdown_tx.subscribe());
    let drain_handle = tokio::spawn(drain_rule_updates(update_rx));

    let monitor_handle = config.diagnostics.enabled.then(|| {
        spawn_mapping_monitor(
            Arc::clone(&table),
            config.diagnostics.interval(),
            shutdown_tx.subscribe(),
        )
    });

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Graceful shutdown
    info!("Shutting down...");
    scheduler.shutdown();
    let _ = shutdown_tx.send(());

    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        scheduler_handle.join().await;
        let _ = sync_handle.await;
        if let Some(handle) = monitor_handle {
            let _ = handle.await;
        }
        // The sync task dropped its sender, so the drain ends too
        let _ = drain_handle.await;
    })
    .await;
    if stopped.is_err() {
        warn!("Background tasks did not stop within 5s");
    }

    let shuffle = scheduler.stats().snapshot();
    info!(
        "Final shuffle stats: {} rounds, {} shuffles, {} collisions, {} exhausted, {} skipped",
        shuffle.rounds, shuffle.shuffles, shuffle.collisions, shuffle.exhausted, shuffle.skipped
    );
    let rewrite = controller.rewriter().stats().snapshot();
    info!(
        "Final DNS stats: {} responses, {} answers rewritten, {} unknown, {} malformed",
        rewrite.packets, rewrite.answers_rewritten, rewrite.answers_unknown, rewrite.malformed
    );

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
