use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{
    signal,
    sync::{mpsc, watch},
};
use tracing::{error, info, warn};

use warehouse_ops as wops;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = wops::config::load_config().context("failed to load configuration")?;
    wops::config::init_tracing(cfg.log_level(), cfg.log_json);
    wops::handlers::health::init_start_time();

    // Init DB
    let db_pool = wops::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        wops::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = wops::events::EventSender::new(event_tx);
    tokio::spawn(wops::events::process_events(event_rx));

    let services =
        wops::services::ServiceFactory::new(db_arc.clone(), &cfg, Some(event_sender.clone()))
            .build();

    if cfg.seed_warehouse_configuration {
        services
            .config_store
            .ensure_default()
            .await
            .context("failed to seed warehouse configuration")?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handles = if cfg.scheduler_enabled {
        wops::scheduler::Scheduler::from_services(&services, &cfg).spawn(shutdown_rx)
    } else {
        warn!("Scheduler disabled; sweeps and recurring stock checks only run on demand");
        Vec::new()
    };

    let app_state = wops::AppState {
        db: db_arc.clone(),
        config: cfg.clone(),
        services,
        event_sender: Some(event_sender),
    };
    let app = wops::api_router(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    info!(tz = %cfg.timezone(), "warehouse-ops listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in scheduler_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
