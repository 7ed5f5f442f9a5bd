use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::time::Duration;

use licensehook::config::Config;
use licensehook::db::{AppState, create_pool, init_db};
use licensehook::handlers;
use licensehook::jwt::TenantTokenKey;
use licensehook::tasks::{self, RetentionPolicy};
use licensehook::worker::WorkerPool;

#[derive(Parser, Debug)]
#[command(name = "licensehook")]
#[command(about = "Payment webhook to tenant license pipeline")]
struct Cli {
    /// Create or upgrade the schema, then exit
    #[arg(long)]
    migrate_only: bool,

    /// Serve HTTP without starting job workers (another process drains the queue)
    #[arg(long)]
    no_workers: bool,

    /// Print a tenant API token for the given tenant id, then exit
    #[arg(long, value_name = "TENANT_ID")]
    mint_tenant_token: Option<String>,

    /// Lifetime of a minted tenant token, in days
    #[arg(long, default_value_t = 30, requires = "mint_tenant_token")]
    token_ttl_days: u64,
}

fn exit_with(message: impl std::fmt::Display) -> ! {
    tracing::error!("{}", message);
    eprintln!("{}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "licensehook=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| exit_with(format!("Invalid configuration: {}", e)));

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    if let Some(tenant_id) = cli.mint_tenant_token.as_deref() {
        let ttl = Duration::from_secs(cli.token_ttl_days * 86400);
        let token = TenantTokenKey::from_secret(&config.tenant_token_secret)
            .mint(tenant_id, ttl)
            .unwrap_or_else(|e| exit_with(e));
        println!("{}", token);
        return;
    }

    let db_pool = create_pool(&config.database_path)
        .unwrap_or_else(|e| exit_with(format!("Failed to create database pool: {}", e)));
    {
        let conn = db_pool
            .get()
            .unwrap_or_else(|e| exit_with(format!("Failed to get connection: {}", e)));
        init_db(&conn).unwrap_or_else(|e| exit_with(format!("Failed to initialize database: {}", e)));
    }

    if cli.migrate_only {
        tracing::info!("Schema is up to date at {}", config.database_path);
        return;
    }

    let state = AppState::from_config(db_pool, &config)
        .unwrap_or_else(|e| exit_with(format!("Failed to build application state: {}", e)));

    tasks::spawn_expiry_sweep(state.clone(), config.expiry_sweep_interval);
    tasks::spawn_cleanup_task(
        state.clone(),
        RetentionPolicy {
            job_retention_days: config.job_retention_days,
            validation_retention_days: config.validation_retention_days,
        },
    );

    let workers = if cli.no_workers {
        tracing::info!("Job workers disabled (--no-workers)");
        None
    } else {
        Some(WorkerPool::spawn(state.clone(), &config.worker))
    };

    let app = handlers::app(state, &config.rate_limit);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| exit_with(format!("Failed to bind to {}: {}", addr, e)));

    tracing::info!("licensehook listening on {}", addr);

    // Peer addresses feed the per-IP rate limiters.
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Some(workers) = workers {
        workers.shutdown().await;
    }

    if let Err(e) = served {
        exit_with(format!("Server error: {}", e));
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}
