//! ftr-rc (Recolecciones) - Collection intake service
//!
//! Startup: config -> tracing -> banner -> root folder + database ->
//! object store -> anchoring integrations -> HTTP server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use ftr_common::config::{self, TomlConfig, CONFIG_ENV_VAR, ROOT_FOLDER_ENV_VAR};
use ftr_common::db::init_database;
use ftr_rc::anchor::{spawn_worker, AnchorService, AnchorSettings, EvmChainClient, PinataClient};
use ftr_rc::storage::LocalObjectStore;
use ftr_rc::{build_router, AppState};

/// Command-line arguments for ftr-rc
#[derive(Parser, Debug)]
#[command(name = "ftr-rc")]
#[command(about = "Forestry traceability collection intake service")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Folder holding the database and photo storage
    #[arg(short, long, env = ROOT_FOLDER_ENV_VAR)]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing so the configured level applies from the start
    let config_result = config::load_toml_config(args.config.as_deref());
    let mut toml_config = match &config_result {
        Ok(c) => c.clone(),
        Err(_) => TomlConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&toml_config.logging.level)),
        )
        .init();

    info!(
        "Starting FTR Recolecciones (ftr-rc) v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = config_result {
        error!("Failed to load config: {}", e);
        return Err(e.into());
    }

    toml_config.apply_process_env();
    if let Some(port) = args.port {
        toml_config.server.port = port;
    }

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = config::database_path(&root_folder);
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("✓ Database ready: {}", db_path.display());

    let bucket = toml_config.storage.bucket.clone();
    let bucket_dir = config::storage_path(&root_folder, &bucket);
    let store = LocalObjectStore::new(
        bucket_dir.clone(),
        toml_config.storage.resolved_public_base_url(&toml_config.server),
    );
    store.ensure_bucket().await?;
    info!("✓ Photo bucket '{}' at {}", bucket, bucket_dir.display());

    let settings = AnchorSettings::from_config(&toml_config.chain, &toml_config.anchoring);
    let backoff_base_ms = settings.backoff_base_ms;
    let mut anchoring = AnchorService::new(settings);

    let pinning = &toml_config.pinning;
    match (&pinning.jwt, &pinning.gateway_domain) {
        (Some(jwt), Some(gateway)) if pinning.is_enabled() => {
            let client = PinataClient::new(&pinning.api_url, jwt, gateway)?;
            anchoring = anchoring.with_pinning(Arc::new(client));
            info!("✓ Metadata pinning enabled ({})", pinning.api_url);
        }
        _ => warn!("Metadata pinning disabled (PINATA_JWT / GATEWAY_URL not set)"),
    }

    let chain = &toml_config.chain;
    match (&chain.rpc_url, &chain.private_key, &chain.contract_address) {
        (Some(rpc_url), Some(key), Some(contract)) if chain.is_enabled() => {
            let client = EvmChainClient::new(rpc_url, key, contract)?;
            anchoring = anchoring.with_chain(Arc::new(client));
            info!("✓ Chain anchoring enabled (contract {})", contract);
        }
        _ => warn!("Chain anchoring disabled (RPC_URL / PRIVATE_KEY / CONTRACT_ADDRESS not set)"),
    }

    let anchoring = Arc::new(anchoring);
    if anchoring.is_active() {
        spawn_worker(
            pool.clone(),
            anchoring.clone(),
            Duration::from_secs(toml_config.anchoring.poll_interval_secs.max(1)),
        );
    } else {
        info!("Anchoring worker not started; outbox rows will wait");
    }

    let state = AppState::new(pool, Arc::new(store), anchoring)
        .with_anchor_delay_ms(backoff_base_ms)
        .with_static_storage(bucket, bucket_dir);
    let app = build_router(state);

    let addr = toml_config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("ftr-rc listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
