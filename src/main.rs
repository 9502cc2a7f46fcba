use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reel_signage::download::HttpDownloadApi;
use reel_signage::location::FixedPositionProvider;
use reel_signage::player::SimulatedPlayer;
use reel_signage::protocol::WebSocketTransport;
use reel_signage::{App, Capabilities, Config};

// Used when no fixed position is configured
const DEFAULT_POSITION: [f64; 2] = [0.0, 0.0];

// Without a display pipeline every video "plays" for this long
const SIMULATED_CLIP_LENGTH: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reel_signage=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting reel-signage {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("Failed to load configuration")?;

    let [longitude, latitude] = config.location.fixed_position.unwrap_or_else(|| {
        warn!("No fixed position configured, reporting {:?}", DEFAULT_POSITION);
        DEFAULT_POSITION
    });

    let capabilities = Capabilities {
        transport: Arc::new(WebSocketTransport::new(config.server.socket_url.clone())),
        download_api: Arc::new(HttpDownloadApi::new(
            &config.server.api_base_url,
            config.download.request_timeout(),
        )?),
        player: Arc::new(SimulatedPlayer::new(SIMULATED_CLIP_LENGTH)),
        positions: Arc::new(FixedPositionProvider::new(longitude, latitude)),
    };

    let app = App::start(config, capabilities).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    app.shutdown().await;
    Ok(())
}
