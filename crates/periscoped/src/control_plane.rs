//! Control plane: assembles the metadata service and serves it over HTTP.
//!
//! The daemon:
//! 1. Opens the state store (on disk or in memory)
//! 2. Builds the agent registry and the metadata server on top of it
//! 3. Runs the expired-agent reaper and the tracepoint expiry loop
//! 4. Serves the HTTP API until Ctrl-C, then drains background tasks

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use periscope_agents::AgentRegistry;
use periscope_api::ApiState;
use periscope_metadata::MetadataServer;
use periscope_state::{Clock, StateStore, SystemClock};

use crate::config::Settings;

/// Run the control plane until a shutdown signal arrives.
pub async fn run_control_plane(settings: Settings) -> anyhow::Result<()> {
    info!("periscope control plane starting");

    // ── State store ──────────────────────────────────────────────
    let state = match &settings.db_path {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let state = StateStore::open(path)?;
            info!(path = ?path, "state store opened");
            state
        }
        None => {
            warn!("using in-memory state store; state is lost on exit");
            StateStore::open_in_memory()?
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // ── Agents and metadata service ──────────────────────────────
    let registry = Arc::new(
        AgentRegistry::new(state.clone())
            .with_clock(clock.clone())
            .with_expiry_timeout(settings.agent_expiry_timeout)
            .with_change_log_retention(settings.change_log_retention),
    );
    let streams = CancellationToken::new();
    let server = MetadataServer::new(
        registry.clone(),
        Arc::new(state.clone()),
        Arc::new(state.clone()),
    )
    .with_clock(clock.clone())
    .with_shutdown(streams.clone());

    // ── Background tasks ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reaper_registry = Arc::clone(&registry);
    let reaper_shutdown = shutdown_rx.clone();
    let reap_interval = settings.agent_reap_interval;
    let reaper_handle = tokio::spawn(async move {
        reaper_registry.run_reaper(reap_interval, reaper_shutdown).await;
    });

    let expiry_handle = tokio::spawn(run_tracepoint_expiry(
        state.clone(),
        clock,
        settings.tracepoint_expiry_interval,
        shutdown_rx,
    ));

    // ── HTTP API ─────────────────────────────────────────────────
    let router = periscope_api::build_router(ApiState { server, registry });

    info!(addr = %settings.listen, "API server starting");
    let listener = tokio::net::TcpListener::bind(settings.listen).await?;

    let api = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        streams.cancel();
        let _ = shutdown_tx.send(true);
    });

    api.await?;

    let _ = reaper_handle.await;
    let _ = expiry_handle.await;

    info!("control plane stopped");
    Ok(())
}

/// Periodically terminate tracepoints whose TTL has passed.
pub async fn run_tracepoint_expiry(
    state: StateStore,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match state.expire_tracepoints(clock.now_ns()) {
                    Ok(expired) if !expired.is_empty() => {
                        info!(count = expired.len(), "expired tracepoints terminated");
                    }
                    Err(e) => warn!(error = %e, "tracepoint expiry error"),
                    _ => {}
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
