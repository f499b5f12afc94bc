use clap::Parser;
use roomcast::application::{BridgeDeps, BridgeService, MuxerSettings};
use roomcast::config::Config;
use roomcast::infrastructure::audio::default_devices;
use roomcast::infrastructure::protocols::janus::JanusConnector;
use roomcast::infrastructure::protocols::webrtc::{EngineSettings, WebRtcEngine};
use roomcast::infrastructure::source::DefaultSourceFactory;
use roomcast::interface::api::{build_router, init_metrics, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Bridge RTSP cameras and microphones into Janus video rooms
#[derive(Parser, Debug)]
#[command(name = "roomcast", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "ROOMCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting roomcast");

    let config = Config::load(args.config.as_deref())?;
    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }
    info!("Configuration loaded: {:?}", config);

    let prometheus_handle = init_metrics()?;
    info!("Metrics initialized");

    let engine = WebRtcEngine::new(&EngineSettings {
        mtu: config.rtp.mtu,
        port_min: config.ice.port_min,
        port_max: config.ice.port_max,
    })?;
    let devices = default_devices();
    let deps = BridgeDeps {
        peers: Arc::new(engine),
        gateways: Arc::new(JanusConnector::new(config.gateway.request_timeout())),
        sources: Arc::new(DefaultSourceFactory::new(devices.clone())),
        devices,
    };
    let bridge = BridgeService::new(deps, MuxerSettings::from_config(&config), &config.gateway.address);

    let state = AppState {
        bridge: bridge.clone(),
        default_ice: config.ice_settings(),
    };
    let app = build_router(state, prometheus_handle);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);
    info!("  - Camera push: http://{}/camera/push/start", addr);
    info!("  - Metrics: http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await?;

    bridge.close_all().await;
    info!("roomcast stopped");
    Ok(())
}
