//! # Whisper Transcription Service - Main Application Entry Point
//!
//! An actix-web server that transcribes YouTube videos and uploaded audio
//! files with Whisper, stores each transcript as a JSON record and exports
//! records as JSON, plain text or `.docx`.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (defaults, config.toml, environment variables)
//! - **state**: Shared application state and metrics
//! - **service**: Request orchestration (validate, download, transcribe, persist)
//! - **transcription**: Whisper models, the model cache and job execution
//! - **media**: Audio download via yt-dlp
//! - **audio**: ffmpeg decoding to 16 kHz PCM
//! - **store**: Transcript records and exports
//! - **handlers** / **health**: HTTP endpoints
//! - **middleware**: Request logging and metrics
//! - **error**: Application error type and HTTP error responses

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod media;
mod middleware;
mod service;
mod state;
mod store;
mod transcription;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use device::DevicePreference;
use media::{MediaSource, YtDlpSource};
use service::TranscriptionService;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::WhisperLoader;

/// Set once SIGINT or SIGTERM arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// ## Startup sequence:
/// 1. Load `.env`, initialise tracing, load and validate configuration
/// 2. Build the transcription service (creates uploads/transcripts directories)
/// 3. Optionally preload the default model
/// 4. Probe yt-dlp and ffmpeg, warning when missing
/// 5. Serve until the server stops or a shutdown signal arrives
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting whisper-transcribe-service v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        default_model = %config.models.default_model,
        device = %config.models.device,
        "Configuration loaded"
    );

    let device_preference: DevicePreference = config
        .models
        .device
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let loader = Arc::new(WhisperLoader::new(
        device_preference,
        config.tools.ffmpeg_path.clone(),
    ));
    let media = Arc::new(YtDlpSource::new(
        config.tools.yt_dlp_path.clone(),
        config.tools.ffmpeg_path.clone(),
    ));
    let service = TranscriptionService::new(&config, loader, media.clone())?;

    if config.models.preload {
        let model = config.models.default_model;
        info!(model = %model, "Preloading default model");
        if let Err(e) = service.engine().ensure_loaded(model).await {
            error!(model = %model, error = %e, "Preload failed, the model will be loaded on first use");
        }
    }

    probe_tools(&config, media.as_ref()).await;

    let app_state = AppState::new(config.clone(), service);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialise tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_transcribe_service=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Warn about missing external tools. The server still starts; the affected
/// endpoints report the problem per request.
async fn probe_tools(config: &AppConfig, media: &dyn MediaSource) {
    if media.is_available().await {
        info!(path = %config.tools.yt_dlp_path, "yt-dlp available");
    } else {
        warn!(
            path = %config.tools.yt_dlp_path,
            "yt-dlp not found, YouTube transcription is unavailable (pip install yt-dlp)"
        );
    }

    let ffmpeg_path = config.tools.ffmpeg_path.clone();
    let ffmpeg_ok = tokio::task::spawn_blocking(move || audio::ffmpeg_available(&ffmpeg_path))
        .await
        .unwrap_or(false);
    if ffmpeg_ok {
        info!(path = %config.tools.ffmpeg_path, "ffmpeg available");
    } else {
        warn!(
            path = %config.tools.ffmpeg_path,
            "ffmpeg not found, audio cannot be decoded (https://ffmpeg.org/download.html)"
        );
    }
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
