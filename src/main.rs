//! Jukebox Recovery
//!
//! Runs the playback client, watches its health and repairs it.

use jukebox_recovery::{
    api, bus,
    bus::BusEvent,
    config,
    credentials::{CredentialProvider, StaticToken, TokenFile},
    device::{DeviceManager, DeviceTimeouts},
    health::HealthMonitor,
    playback::{PlaybackManager, PlaybackService},
    player::{
        lifecycle::LifecycleTimeouts, PlayerLifecycle, PlayerLifecycleService, PlayerOptions,
        ProcessPlayerSdk,
    },
    recovery::{CircuitBreaker, OrchestratorSettings, RecoveryOrchestrator, RecoveryTrigger},
    remote::WebApiClient,
    store::FileStore,
    supervisor::{RestartSignal, RESTART_EXIT_CODE},
};

use anyhow::{bail, Result};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long background tasks get to finish after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jukebox_recovery=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Jukebox Recovery v{} ({})",
        env!("JUKEBOX_VERSION"),
        env!("JUKEBOX_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!("Configuration loaded, port: {}", config.port);

    let credentials: Arc<dyn CredentialProvider> =
        match (&config.access_token, &config.token_file) {
            (_, Some(path)) => Arc::new(TokenFile::new(path.clone())),
            (Some(token), None) => Arc::new(StaticToken::new(token.clone())),
            (None, None) => bail!("either access_token or token_file must be configured"),
        };

    let bus = bus::create_bus();
    let shutdown = CancellationToken::new();

    let remote = Arc::new(WebApiClient::new(&config.api_base_url, credentials.clone()));
    let data_dir = config::get_data_dir();
    tracing::info!("State directory: {}", data_dir.display());
    let store = Arc::new(FileStore::new(data_dir));

    let (queue, queue_worker) = PlaybackService::spawn(remote.clone(), shutdown.clone());

    let sdk = Arc::new(ProcessPlayerSdk::new(
        config.player.clone(),
        remote.clone(),
        config.recovery.device_poll(),
    ));
    let lifecycle = Arc::new(PlayerLifecycleService::new(
        sdk,
        remote.clone(),
        PlayerOptions {
            name: config.device_name.clone(),
            credentials: credentials.clone(),
        },
        LifecycleTimeouts::from_config(&config.recovery),
        bus.clone(),
    ));
    let devices = Arc::new(DeviceManager::new(
        lifecycle.clone(),
        remote.clone(),
        DeviceTimeouts::from_config(&config.recovery),
    ));
    let playback = Arc::new(PlaybackManager::new(
        remote.clone(),
        queue.clone(),
        store.clone(),
        config.health.resume_staleness(),
    ));
    let restart = Arc::new(RestartSignal::new(shutdown.clone(), bus.clone()));
    let orchestrator = Arc::new(RecoveryOrchestrator::new(
        lifecycle.clone(),
        devices.clone(),
        playback.clone(),
        Arc::new(CircuitBreaker::from_config(&config.breaker)),
        store,
        bus.clone(),
        restart.clone(),
        OrchestratorSettings::from_config(&config.recovery, config.context_uri.clone()),
    ));
    let trigger: Arc<dyn RecoveryTrigger> = orchestrator.clone();
    devices.defer_to(Arc::downgrade(&trigger));
    let health = Arc::new(HealthMonitor::new(
        remote,
        lifecycle.clone(),
        credentials,
        orchestrator.clone(),
        playback,
        queue.clone(),
        bus.clone(),
        &config.health,
    ));

    // Bring the player up, then hand over to the health monitor
    let monitor = {
        let lifecycle = lifecycle.clone();
        let devices = devices.clone();
        let orchestrator = orchestrator.clone();
        let health = health.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.create_player().await {
                tracing::warn!("Initial player start failed: {}", e);
            }
            if !devices.check_device().await {
                let outcome = orchestrator.recover().await;
                tracing::info!(?outcome, "Startup recovery finished");
            }
            health.run(shutdown).await;
        })
    };

    let state = api::AppState {
        orchestrator,
        devices,
        lifecycle: lifecycle.clone(),
        health,
        queue,
        bus: bus.clone(),
        started_at: Instant::now(),
    };
    let app = api::router(state);

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await?;

    // Cleanup: stop background work and the player process
    shutdown.cancel();
    let reason = restart
        .restart_requested()
        .then(|| "hard reload".to_string());
    bus.publish(BusEvent::ShuttingDown { reason });
    tracing::info!("Stopping player...");
    lifecycle.destroy().await;
    for (name, task) in [("health monitor", monitor), ("playback queue", queue_worker)] {
        if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
            tracing::warn!("{} did not stop in time", name);
        }
    }
    tracing::info!("Shutdown complete");

    if restart.restart_requested() {
        tracing::warn!("Exiting with code {} for supervisor restart", RESTART_EXIT_CODE);
        return Ok(ExitCode::from(RESTART_EXIT_CODE));
    }
    Ok(ExitCode::SUCCESS)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
