use clap::Parser;
use timelapse_core::TimelapseConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use timelapse_server::server;
use timelapse_server::session::{SessionController, SessionSettings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "timelapse.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match TimelapseConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let store = match timelapse_server::open_store(&config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open capture store: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match store.health().await {
            Ok(detail) => println!("✅ {} store reachable: {}", store.name(), detail),
            Err(e) => {
                println!("❌ {} store check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Timelapse health check passed");
        return Ok(());
    }

    let mut controller = SessionController::new(store, SessionSettings::from(&config));
    if let Err(e) = controller.load().await {
        tracing::warn!("Starting with an empty session: failed to load stored exchanges: {}", e);
    }
    let session = controller.into_shared();

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    if config.http.enabled {
        let http_session = session.clone();
        let http_config = config.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) =
                timelapse_server::http::start_http_server(http_session, http_config, http_shutdown).await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.expanded_socket_path();
    server::run_unix_server(&socket_path, session, tx.subscribe()).await?;

    Ok(())
}
