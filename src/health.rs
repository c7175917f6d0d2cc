//! Service health, capability status and metrics endpoints.

use crate::device::{self, DevicePreference};
use crate::service::SUPPORTED_EXTENSIONS;
use crate::state::AppState;
use crate::transcription::ModelSize;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

/// `GET /health`
///
/// Loads the default model through the cache (a no-op when it is already
/// loaded) and reports 500 if that fails.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let service = &state.service;
    let model = service.default_model();
    let youtube_available = service.youtube_available().await;

    match service.engine().ensure_loaded(model).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "status": "healthy",
            "whisper_available": true,
            "whisper_loaded": true,
            "youtube_available": youtube_available,
            "model": model,
            "timestamp": chrono::Local::now().to_rfc3339(),
            "uptime_seconds": state.get_uptime_seconds(),
        })),
        Err(e) => {
            tracing::error!(model = %model, error = %e, "Health check failed");
            HttpResponse::InternalServerError().json(json!({
                "status": "unhealthy",
                "error": e.to_string(),
                "whisper_available": false,
                "whisper_loaded": service.engine().loaded_model().is_some(),
                "youtube_available": youtube_available,
                "model": model,
                "timestamp": chrono::Local::now().to_rfc3339(),
            }))
        }
    }
}

/// `GET /status`: what the service can do right now, without loading anything.
pub async fn system_status(state: web::Data<AppState>) -> HttpResponse {
    let config = &state.config;
    let service = &state.service;
    let engine = service.engine();

    let youtube_available = service.youtube_available().await;
    let ffmpeg_available = service.ffmpeg_available().await;

    let preference: DevicePreference = config.models.device.parse().unwrap_or_default();
    let device = device::describe(&device::select_device(preference));

    let models: Vec<_> = ModelSize::ALL
        .iter()
        .map(|m| {
            json!({
                "name": m,
                "description": m.description(),
                "size_mb": m.size_mb(),
                "repo": m.repo_name(),
            })
        })
        .collect();

    let mut installation_help = serde_json::Map::new();
    if !youtube_available {
        installation_help.insert("youtube".into(), json!("pip install yt-dlp"));
    }
    if !ffmpeg_available {
        installation_help.insert(
            "ffmpeg".into(),
            json!("Install FFmpeg from https://ffmpeg.org/download.html and make sure it is on PATH"),
        );
    }

    HttpResponse::Ok().json(json!({
        "whisper_available": engine.last_load_error().is_none(),
        "youtube_available": youtube_available,
        "ffmpeg_available": ffmpeg_available,
        "supported_formats": SUPPORTED_EXTENSIONS,
        "max_file_size_mb": config.storage.max_upload_mb,
        "default_model": service.default_model(),
        "loaded_model": engine.loaded_model(),
        "last_load_error": engine.last_load_error(),
        "device": device,
        "active_jobs": engine.active_jobs(),
        "max_concurrent_jobs": engine.max_jobs(),
        "cancel_pending": engine.cancel_requested(),
        "version": env!("CARGO_PKG_VERSION"),
        "models": models,
        "installation_help": installation_help,
    }))
}

/// `GET /metrics`
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Local::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "jobs": metrics.jobs,
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let read_kb = |key: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(key))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available for pid {} on this platform", process::id())
    })
}
