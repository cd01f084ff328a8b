use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;

mod config;
mod db;
mod engine;
mod gateway;
mod models;
mod observability;
mod routes;
mod tasks;

use config::KeepsakeConfig;
use db::DbPool;
use gateway::{HttpWorkflowGateway, WorkflowGateway};
use tasks::PolicyLocks;

/// Shared state handed to the admin API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<KeepsakeConfig>,
    pub db: Arc<DbPool>,
    pub gateway: Arc<dyn WorkflowGateway>,
    pub locks: Arc<PolicyLocks>,
}

#[derive(Parser, Debug)]
#[command(
    name = "keepsake",
    version,
    about = "Backup lifecycle orchestrator with grandfather-father-son retention"
)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "keepsake.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the orchestrator (default).
    Serve,
    /// Write a default configuration file.
    Init {
        /// Output path.
        #[arg(short, long, default_value = "keepsake.toml")]
        output: String,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Run database migrations and exit.
    Migrate,
}

const DEFAULT_CONFIG: &str = r#"# Keepsake configuration.

[server]
host = "127.0.0.1"
port = 7300

[database]
path = "keepsake.db"

[gateway]
# Base URL of the workflow API that creates and removes backups.
base_url = "http://localhost:8080/api"
removal_workflow_name = "remove_backup"

[scheduler]
trigger_interval_secs = 300
poll_interval_secs = 10
retention_interval_secs = 3600
delete_retry_interval_secs = 600

[observability.logging]
level = "info"
format = "compact"
"#;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Init { output, force }) => run_init(&output, force),
        Some(Command::Migrate) => run_migrate(&args.config).await,
        Some(Command::Serve) | None => run_server(&args.config).await,
    }
}

fn load_config(path: &str) -> KeepsakeConfig {
    match KeepsakeConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

/// Write a default configuration file.
fn run_init(output: &str, force: bool) {
    if std::path::Path::new(output).exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output
        );
        std::process::exit(1);
    }
    if let Err(e) = std::fs::write(output, DEFAULT_CONFIG) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }
    println!("Created config file: {}", output);
    println!();
    println!("To start the orchestrator, run:");
    println!("  keepsake serve --config {}", output);
}

/// Run migrations against the configured database and exit.
async fn run_migrate(config_path: &str) {
    let config = load_config(config_path);
    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = db.run_migrations().await {
        eprintln!("Migration failed: {}", e);
        std::process::exit(1);
    }
    println!("Migrations applied");
}

async fn run_server(config_path: &str) {
    let config = load_config(config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    tracing::info!(
        config_file = %config_path,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Keepsake"
    );

    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, path = %config.database.path, "Failed to open database");
            std::process::exit(1);
        }
    };
    if config.database.run_migrations
        && let Err(e) = db.run_migrations().await
    {
        tracing::error!(error = %e, "Failed to run migrations");
        std::process::exit(1);
    }

    let gateway = match HttpWorkflowGateway::from_config(&config.gateway) {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "Failed to construct workflow gateway");
            std::process::exit(1);
        }
    };

    let state = AppState {
        config: Arc::new(config),
        db: Arc::new(db),
        gateway: Arc::new(gateway),
        locks: Arc::new(PolicyLocks::new()),
    };

    // Four independent timers: creation trigger, operation poll, retention,
    // delete retry.
    let scheduler = state.config.scheduler.clone();
    tokio::spawn(tasks::backup::start_backup_trigger_worker(
        state.db.clone(),
        state.gateway.clone(),
        state.locks.clone(),
        scheduler.clone(),
    ));
    tokio::spawn(tasks::start_operation_poll_worker(
        state.db.clone(),
        state.gateway.clone(),
        state.locks.clone(),
        scheduler.clone(),
    ));
    tokio::spawn(tasks::retention::start_retention_worker(
        state.db.clone(),
        state.gateway.clone(),
        state.locks.clone(),
        scheduler.clone(),
    ));
    tokio::spawn(tasks::deletion::start_delete_retry_worker(
        state.db.clone(),
        state.gateway.clone(),
        scheduler,
    ));

    let addr = state.config.server.listen_addr();
    let app = build_app(state);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "Failed to bind listen address");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Admin API listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

pub fn build_app(state: AppState) -> Router {
    routes::admin_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
