//! Wallet server binary.

use api::{logging, AppState, Config};
use database::Database;
use lightning_backend::BackendRegistry;
use payments::{PaymentEngine, Shutdown};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    logging::init(config.log_json);
    info!(addr = %config.addr, backend = %config.lightning_backend, "starting wallet server");

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;

    let backend = BackendRegistry::with_defaults().build(&config.lightning_backend, &config.backend)?;
    let node = match backend.get_info().await {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, backend = %config.lightning_backend, "couldn't start lightning backend");
            return Err(e.into());
        }
    };
    info!(
        kind = %config.lightning_backend,
        alias = %node.alias,
        msat = node.balance_msat,
        "initialized lightning backend"
    );

    let engine = PaymentEngine::new(db.clone(), backend, config.engine.clone());
    engine.start()?;
    engine.resume_pending().await?;
    engine.sync_invoices().await?;

    let state = AppState::new(engine.clone(), config.site.clone())?;
    let app = api::app(state, config.static_dir.as_deref());

    let shutdown = engine.shutdown_handle().clone();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "http listening");

    let notifier = engine.notifier().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.wait().await;
            // Ends open event streams so the server can drain.
            notifier.close();
        })
        .await?;

    engine.shutdown().await;
    db.close().await;
    info!("wallet server stopped");
    Ok(())
}

async fn wait_for_signal(shutdown: Shutdown) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            _ => {
                warn!("unix signal handlers unavailable, falling back to ctrl-c");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "ctrl-c handler failed");
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "ctrl-c handler failed");
            return;
        }
        info!("Received Ctrl+C");
    }

    shutdown.trigger();
}
