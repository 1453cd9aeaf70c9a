use std::sync::Arc;

use clap::Parser;
use patrol_core::{HttpPresenceFeed, PatrolConfig, PgPatrolStore, SessionRegistry};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use patrol_server::http::{self, HttpState};
use patrol_server::subsystems::monitor::{MonitorSettings, PatrolMonitor};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "patrol.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match PatrolConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over service.log_level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.service.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let pool = match patrol_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match patrol_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Patrol DB health check passed");
        return Ok(());
    }

    patrol_core::db::ensure_schema(&pool).await?;

    let store = Arc::new(PgPatrolStore::new(pool.clone()));
    let feed = Arc::new(HttpPresenceFeed::from_config(&config.feed)?);
    let registry = Arc::new(SessionRegistry::new());
    let monitor = Arc::new(PatrolMonitor::new(
        registry,
        feed,
        store.clone(),
        MonitorSettings::from(&config.monitor),
    ));

    // A failed restore aborts startup.
    monitor.start().await?;

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();
    let mut shutdown_rx = tx.subscribe();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if config.http.enabled {
        let http_state = Arc::new(HttpState {
            pool: pool.clone(),
            store: store.clone(),
            monitor: monitor.clone(),
        });
        let http_config = config.http.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = http::start_http_server(http_state, &http_config, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let _ = shutdown_rx.recv().await;
    monitor.stop().await;
    tracing::info!(
        tracked = monitor.registry().len().await,
        "Patrol monitor stopped"
    );

    Ok(())
}
