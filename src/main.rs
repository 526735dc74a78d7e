use navarb::datasource::{DryRunExecutor, Executor, RpcStateReader, StateReader};
use navarb::engine::BalanceLedger;
use navarb::orchestration::{Finalizer, Monitor, MonitorConfig, Watcher};
use navarb::{api, config::Config, db::init_db, Repository};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let port = config.port;

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(Repository::new(pool));
    let reader: Arc<dyn StateReader> = Arc::new(RpcStateReader::new(
        config.rpc_url.clone(),
        config.rpc_targets(),
        config.token0_decimals,
        config.token1_decimals,
    ));
    let executor: Arc<dyn Executor> = Arc::new(DryRunExecutor::new(reader.clone()));

    let ledger = match BalanceLedger::open(repo.clone(), config.pool_id.clone()).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to load balance log: {}", e);
            std::process::exit(1);
        }
    };
    let finalizer = Finalizer::new(
        repo,
        executor.clone(),
        config.pool_id.clone(),
        config.redemption_delay(),
    );
    let monitor = Monitor::new(
        reader.clone(),
        executor,
        ledger.clone(),
        finalizer.clone(),
        MonitorConfig::from(&config),
    );

    // Queued redemptions from a previous run
    if let Err(e) = finalizer.resume().await {
        tracing::error!(error = %e, "Failed to resume pending finalizations");
    }

    match monitor.open_ledger().await {
        Ok(Some(balance)) => tracing::info!(starting_balance = %balance, "Opening balance recorded"),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Opening balance valuation failed"),
    }

    let watcher = Watcher::new(reader, monitor.clone(), config.poll_interval());
    tokio::spawn(watcher.run());

    // Create router
    let app = api::create_router(api::AppState::new(monitor));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
