use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use ttl_sweeper::{
    config::EngineConfig,
    db::DbPool,
    expiration::{CleanupPass, FileConfigSource, Scheduler},
    models::RuleKey,
    observability,
    services::RuleService,
};

/// CLI arguments for the TTL sweeper
#[derive(Parser, Debug)]
#[command(version, about = "TTL expiration engine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "ttl-sweeper.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the expiration scheduler until SIGINT/SIGTERM (default)
    ///
    /// SIGHUP re-reads the [scheduler] section of the config file.
    Run,
    /// Run a single cleanup pass now and print the result as JSON
    RunOnce,
    /// Run database migrations and exit
    Migrate,
    /// Manage expiration rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Show enabled compile-time features
    Features,
}

#[derive(clap::Subcommand, Debug)]
enum RulesCommand {
    /// Register a rule, or update an existing one
    Add {
        /// Table name, optionally schema-qualified (`schema.table`)
        collection: String,
        /// Date or timestamp column compared against the retention window
        time_field: String,
        /// Rows older than this many seconds are deleted
        #[arg(long)]
        retention_secs: i64,
        /// Maximum rows removed per delete statement (default: 10000)
        #[arg(long)]
        batch_size: Option<u32>,
    },
    /// Delete a rule and drop its index
    Remove {
        collection: String,
        time_field: String,
    },
    /// Stop expiring a rule while keeping its configuration
    Deactivate {
        collection: String,
        time_field: String,
    },
    /// Zero a rule's deletion statistics
    Reset {
        collection: String,
        time_field: String,
    },
    /// List rules as JSON
    List {
        /// Include deactivated rules
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Features) => run_features(),
        Some(Command::Migrate) => run_migrate(&args.config).await,
        Some(Command::RunOnce) => run_once(&args.config).await,
        Some(Command::Rules { command }) => run_rules(&args.config, command).await,
        Some(Command::Run) | None => run_scheduler(&args.config).await,
    }
}

/// Load config, initialise logging and connect to the database.
///
/// Migrations run when `auto_migrate` is set and the database config asks
/// for them. Exits the process on failure.
async fn bootstrap(config_path: &Path, auto_migrate: bool) -> (EngineConfig, Arc<DbPool>) {
    let config = match EngineConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let pool = match DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if auto_migrate
        && config.database.run_migrations()
        && let Err(e) = pool.run_migrations().await
    {
        tracing::error!(error = %e, "Database migrations failed");
        eprintln!("Error: Database migrations failed: {}", e);
        std::process::exit(1);
    }

    (config, Arc::new(pool))
}

/// Run the scheduler until a shutdown signal arrives or its loop dies.
async fn run_scheduler(config_path: &Path) {
    let (config, db) = bootstrap(config_path, true).await;

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let scheduler = match Scheduler::new(
        CleanupPass::from_pool(&db),
        db.clone(),
        Arc::new(FileConfigSource::new(config_path)),
    ) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = scheduler.start().await {
        tracing::error!(error = %e, "Failed to start scheduler");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    tokio::select! {
        signalled = wait_for_signals(&scheduler) => {
            if let Err(e) = signalled {
                tracing::error!(error = %e, "Failed to install signal handlers");
            }
        }
        () = scheduler.exited() => {
            // Nothing asked the loop to stop
            scheduler.stop().await;
            tracing::error!("Expiration scheduler exited unexpectedly");
            eprintln!("Error: expiration scheduler exited unexpectedly");
            std::process::exit(1);
        }
    }

    tracing::info!("Shutdown signal received, finishing current batch...");
    scheduler.stop().await;
}

/// Block until SIGINT or SIGTERM, reloading configuration on SIGHUP.
#[cfg(unix)]
async fn wait_for_signals(scheduler: &Scheduler) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return result,
            _ = terminate.recv() => return Ok(()),
            _ = hangup.recv() => {
                // Rejections are logged by the scheduler
                if let Ok(config) = scheduler.reload().await {
                    tracing::info!(
                        interval_secs = config.interval_secs,
                        enabled = config.enabled,
                        "Reloaded scheduler configuration"
                    );
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_scheduler: &Scheduler) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Run one pass and print the result.
async fn run_once(config_path: &Path) {
    let (config, db) = bootstrap(config_path, true).await;

    match CleanupPass::from_pool(&db)
        .run_one_pass(&config.scheduler.lock_name)
        .await
    {
        Ok(result) => print_json(&result),
        Err(e) => {
            tracing::error!(error = %e, "Cleanup pass failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_migrate(config_path: &Path) {
    let (_, db) = bootstrap(config_path, false).await;

    tracing::info!(config_file = %config_path.display(), "Running database migrations");
    match db.run_migrations().await {
        Ok(()) => tracing::info!("Database migrations completed successfully"),
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            eprintln!("Error: Database migrations failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_rules(config_path: &Path, command: RulesCommand) {
    let (_, db) = bootstrap(config_path, true).await;
    let service = RuleService::from_pool(&db);

    let outcome = match command {
        RulesCommand::Add {
            collection,
            time_field,
            retention_secs,
            batch_size,
        } => service
            .register(&collection, &time_field, retention_secs, batch_size)
            .await
            .map(|rule| print_json(&rule)),
        RulesCommand::Remove {
            collection,
            time_field,
        } => service
            .remove(&RuleKey::new(collection, time_field))
            .await
            .map(|removed| report(removed.is_some(), "removed")),
        RulesCommand::Deactivate {
            collection,
            time_field,
        } => service
            .deactivate(&RuleKey::new(collection, time_field))
            .await
            .map(|changed| report(changed, "deactivated")),
        RulesCommand::Reset {
            collection,
            time_field,
        } => service
            .reset_stats(&RuleKey::new(collection, time_field))
            .await
            .map(|changed| report(changed, "reset")),
        RulesCommand::List { all } => service.list(all).await.map(|rules| print_json(&rules)),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn report(found: bool, action: &str) {
    if found {
        println!("Rule {action}");
    } else {
        eprintln!("No such rule");
        std::process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: Failed to serialize output: {}", e);
            std::process::exit(1);
        }
    }
}

/// Print enabled compile-time features and build profile.
fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        ("database-sqlite", "Databases", cfg!(feature = "database-sqlite")),
        (
            "database-postgres",
            "Databases",
            cfg!(feature = "database-postgres"),
        ),
        ("prometheus", "Observability", cfg!(feature = "prometheus")),
        ("cli", "Execution", cfg!(feature = "cli")),
    ];

    let profile = if cfg!(feature = "full") {
        "full"
    } else if cfg!(feature = "minimal") {
        "minimal"
    } else {
        "custom"
    };

    println!("ttl-sweeper v{version}\n");
    println!("Build profile: {profile}");
    match profile {
        "full" => println!("  (full = minimal + postgres, prometheus)\n"),
        "minimal" => println!("  (minimal = cli + sqlite)\n"),
        _ => println!(),
    }

    println!("Compile-time features:");

    let mut current_group = "";
    for &(name, group, enabled) in features {
        if group != current_group {
            if !current_group.is_empty() {
                println!();
            }
            println!("  {group}:");
            current_group = group;
        }
        let status = if enabled { "enabled" } else { "disabled" };
        println!("    {name:<32} {status}");
    }
}
