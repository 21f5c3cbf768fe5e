// =============================================================================
// main.rs - the IMMCAD backend daemon
// =============================================================================
//
// The binary wires the service graph, then runs the two long-lived loops the
// core owns directly: the cadence-driven ingestion scheduler and the ops
// endpoint server. The JSON API routes are mounted by the external HTTP
// framework adapter against the same AppContext.
// =============================================================================

use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use immcad_api::app::build_app_context;
use immcad_api::config::Settings;
use immcad_api::metrics::run_ops_server;
use immcad_api::sources::registry::UpdateCadence;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let settings = Settings::from_env()?;
    info!(
        environment = settings.environment.as_str(),
        primary_provider = settings.primary_provider.as_str(),
        "IMMCAD backend starting"
    );

    let context = std::sync::Arc::new(build_app_context(settings).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Ingestion scheduler: one task owns the checkpoint store and runs each
    // cadence bucket on its own interval. The first tick fires at startup so
    // a fresh deployment warms its checkpoints immediately.
    let scheduler_context = std::sync::Arc::clone(&context);
    let mut scheduler_shutdown = shutdown_rx.clone();
    let scheduler_handle = tokio::spawn(async move {
        let mut store = scheduler_context.open_checkpoint_store();
        let engine = std::sync::Arc::clone(&scheduler_context.ingestion_engine);

        let mut daily = tokio::time::interval(Duration::from_secs(24 * 3600));
        let mut weekly = tokio::time::interval(Duration::from_secs(7 * 24 * 3600));
        let mut incremental = tokio::time::interval(Duration::from_secs(12 * 3600));
        daily.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        weekly.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        incremental.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("ingestion scheduler online");
        loop {
            let cadence = tokio::select! {
                _ = daily.tick() => UpdateCadence::Daily,
                _ = weekly.tick() => UpdateCadence::Weekly,
                _ = incremental.tick() => UpdateCadence::ScheduledIncremental,
                _ = scheduler_shutdown.changed() => break,
            };
            if let Err(err) = engine.run(&mut store, Some(cadence), None).await {
                error!(cadence = %cadence, error = %err, "ingestion run failed to persist");
            }
        }
        info!("ingestion scheduler offline");
    });

    // Ops endpoint server (/healthz, /ops/metrics).
    let ops_state = context.ops_state();
    let ops_port = context.settings.ops_port;
    let mut ops_shutdown = shutdown_rx.clone();
    let ops_handle = tokio::spawn(async move {
        run_ops_server(ops_state, ops_port, &mut ops_shutdown).await;
    });

    info!(
        ops_port = context.settings.ops_port,
        checkpoint_path = %context.settings.ingestion_checkpoint_state_path.display(),
        "IMMCAD backend online; press ctrl-c to stop"
    );

    match signal::ctrl_c().await {
        Ok(()) => warn!("shutdown signal received"),
        Err(err) => error!(error = %err, "signal listener failed; shutting down"),
    }
    let _ = shutdown_tx.send(true);

    if tokio::time::timeout(Duration::from_secs(10), async {
        let _ = tokio::join!(scheduler_handle, ops_handle);
    })
    .await
    .is_err()
    {
        warn!("tasks did not stop within 10s; exiting anyway");
    }

    info!("IMMCAD backend stopped");
    Ok(())
}
