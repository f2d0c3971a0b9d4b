use anyhow::Context;
use roomdrop::{AppState, Config, Hub, app, rooms::{RoomStore, sweep::sweep_task}};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,roomdrop=debug")))
        .init();

    let config = Config::from_env()?;
    config.validate()?;

    let store = RoomStore::connect(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    store.migrate().await.context("creating schema")?;

    let hub = Hub::new(store.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(sweep_task(
        hub.clone(),
        config.sweep_interval(),
        config.idle_timeout(),
        shutdown_rx,
    ));

    let bind_addr = config.bind_addr;
    let app = app(AppState::new(hub, config));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(%bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;
    store.close().await;
    Ok(())
}
