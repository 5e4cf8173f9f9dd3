use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;

use phase_pipeline::api;
use phase_pipeline::candles::{CandleSource, FileCandleSource, SyntheticCandleSource};
use phase_pipeline::{build_controller, AppState, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Phase pipeline server: runs session phases and streams their events")]
struct Args {
    /// Port to run the web server on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Candle file or directory (.csv, .csv.zst, .json). Synthetic candles when omitted.
    #[arg(short, long, env = "CANDLE_DATA")]
    data: Option<PathBuf>,

    /// Events retained per phase for late subscribers
    #[arg(long, env = "REPLAY_CAPACITY", default_value = "10000")]
    replay_capacity: usize,

    /// Per-subscriber channel size before a slow client is dropped
    #[arg(long, env = "SUBSCRIBER_BUFFER", default_value = "1024")]
    subscriber_buffer: usize,

    /// Seconds to wait before re-opening a failed candle stream
    #[arg(long, env = "RETRY_BACKOFF_SECS", default_value = "2")]
    retry_backoff_secs: u64,

    /// Delay per candle in milliseconds, to replay at a watchable speed
    #[arg(long, env = "PACE_MS")]
    pace_ms: Option<u64>,

    /// Static frontend directory
    #[arg(long, env = "STATIC_DIR")]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("phase_pipeline=info".parse()?)
                .add_directive("phase_server=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = PipelineConfig {
        replay_capacity: args.replay_capacity,
        subscriber_buffer: args.subscriber_buffer,
        retry_backoff: Duration::from_secs(args.retry_backoff_secs),
        ..PipelineConfig::default()
    };

    info!("Starting phase pipeline server");
    info!("Port: {}", args.port);
    info!("Replay capacity: {} events per phase", config.replay_capacity);

    let pace = args.pace_ms.map(Duration::from_millis);
    let source: Arc<dyn CandleSource> = match &args.data {
        Some(path) => {
            info!("Candle data: {:?}", path);
            let source = FileCandleSource::new(path);
            Arc::new(match pace {
                Some(pace) => source.with_pace(pace),
                None => source,
            })
        }
        None => {
            info!("No candle data configured, using synthetic candles");
            Arc::new(SyntheticCandleSource {
                pace,
                ..SyntheticCandleSource::default()
            })
        }
    };

    let state = Arc::new(AppState {
        controller: Arc::new(build_controller(&config, source)),
    });

    // Build router
    let mut app = Router::new()
        .route("/ws", get(api::ws_handler))
        .route("/api/events", get(api::get_events))
        .route("/api/dates", get(api::get_dates))
        .route("/api/status", get(api::get_status));

    if let Some(dir) = &args.static_dir {
        info!("Serving frontend from {:?}", dir);
        app = app.fallback_service(ServeDir::new(dir));
    }

    let app = app
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(Arc::clone(&state));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    state.controller.close();
    info!("Server stopped");
    Ok(())
}
