//! # Overlay Node
//!
//! Entry point for a single overlay node.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`RUST_LOG`, default `info`)
//! 2. Load configuration (`OVERLAY_CONFIG` file, then `OVERLAY_*` overrides)
//! 3. Load or generate the identity (`OVERLAY_IDENTITY`)
//! 4. Construct the node
//! 5. Join `OVERLAY_TOPICS`
//! 6. Run until Ctrl+C, then shut down in reverse order

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use overlay_node::{load_or_generate, OverlayRuntime, RuntimeSettings};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = RuntimeSettings::from_env()?;
    let key = load_or_generate(&settings.identity_path)?;

    let mut runtime = OverlayRuntime::new(settings.config, &key)?;
    runtime.start(&settings.topics).await?;

    runtime
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {e}");
            }
            info!("Shutdown signal received");
        })
        .await;

    runtime.shutdown().await;
    Ok(())
}
