// Inkpad Desktop - plugin host entry point
//
// Runs the plugin host headless until interrupted. The editor UI embeds the
// same `AppState` and calls the command functions directly.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use inkpad_desktop::commands::plugins::list_plugins;
use inkpad_desktop::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("inkpad_desktop=info,inkpad_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().ok();

    let state = AppState::new();
    state
        .initialize()
        .await
        .context("failed to initialize the plugin host")?;

    let port = state.plugins().manager().await?.local_port();
    let plugins = list_plugins(state.plugins()).await.data.unwrap_or_default();
    info!(?port, plugins = plugins.len(), "Inkpad plugin host ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    state.shutdown().await;
    Ok(())
}
