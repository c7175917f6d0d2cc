pub mod control;
pub mod transcribe;
pub mod transcripts;

pub use control::*;
pub use transcribe::*;
pub use transcripts::*;

use crate::health;
use actix_web::web;

/// Register every route. Shared by the server and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/transcribe_youtube", web::post().to(transcribe_youtube))
        .route("/transcribe_file", web::post().to(transcribe_file))
        .route("/download_transcript/{id}", web::get().to(download_transcript))
        .route("/cancel_transcription", web::post().to(cancel_transcription))
        .route("/health", web::get().to(health::health_check))
        .route("/status", web::get().to(health::system_status))
        .route("/metrics", web::get().to(health::detailed_metrics));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::middleware::{MetricsMiddleware, RequestLogging};
    use crate::service::TranscriptionService;
    use crate::state::AppState;
    use crate::testing::{test_config, FakeBehavior, FakeLoader, FakeMediaSource};
    use crate::transcription::ModelLoader;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;

    const BOUNDARY: &str = "----transcribe-test-boundary";

    struct Harness {
        _dir: TempDir,
        config: AppConfig,
        state: AppState,
    }

    fn harness_with(loader: impl ModelLoader + 'static) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let service = TranscriptionService::new(
            &config,
            Arc::new(loader),
            Arc::new(FakeMediaSource::titled("Video X")),
        )
        .unwrap();
        let state = AppState::new(config.clone(), service);
        Harness { _dir: dir, config, state }
    }

    fn harness() -> Harness {
        harness_with(FakeLoader::new(FakeBehavior::succeed("hello from the fake model")))
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .wrap(MetricsMiddleware)
                    .wrap(RequestLogging)
                    .configure(configure),
            )
            .await
        };
    }

    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(parts: &[(&str, Option<&str>, &[u8])]) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/transcribe_file")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(parts))
    }

    #[actix_web::test]
    async fn test_transcribe_youtube() {
        let h = harness();
        let app = test_app!(h.state);

        let req = test::TestRequest::post()
            .uri("/transcribe_youtube")
            .set_json(json!({"url": "https://example.com/videoX", "model_size": "base"}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["title"], "Video X");
        assert_eq!(body["transcript"], "hello from the fake model");
        assert_eq!(body["language"], "en");

        let record_id = body["transcript_file"].as_str().unwrap();
        assert!(h.config.storage.transcripts_dir.join(record_id).exists());
    }

    #[actix_web::test]
    async fn test_transcribe_youtube_requires_url() {
        let h = harness();
        let app = test_app!(h.state);

        for payload in [json!({}), json!({"url": ""})] {
            let req = test::TestRequest::post()
                .uri("/transcribe_youtube")
                .set_json(payload)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], "YouTube URL is required");
            assert_eq!(body["kind"], "validation_error");
        }

        let req = test::TestRequest::post()
            .uri("/transcribe_youtube")
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_transcribe_file() {
        let h = harness();
        let app = test_app!(h.state);

        let req = upload_request(&[
            ("file", Some("clip.wav"), b"RIFF fake wave data"),
            ("model_size", None, b"small"),
        ])
        .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["filename"], "clip.wav");
        assert!(body["transcript_file"].as_str().unwrap().starts_with("clip_"));

        let leftovers = std::fs::read_dir(&h.config.storage.uploads_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[actix_web::test]
    async fn test_transcribe_file_validation() {
        let h = harness();
        let app = test_app!(h.state);

        let req = upload_request(&[("model_size", None, b"base")]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No file uploaded");

        let req = upload_request(&[("file", Some("notes.txt"), b"hello")]).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("not supported"));

        let leftovers = std::fs::read_dir(&h.config.storage.uploads_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[actix_web::test]
    async fn test_transcribe_file_rejects_model_before_storing_upload() {
        let h = harness();
        let app = test_app!(h.state);

        // Over the 1 MB test ceiling: storing it would fail with "too large".
        let oversized = vec![0u8; 2 * 1024 * 1024];
        let req = upload_request(&[
            ("model_size", None, b"gigantic"),
            ("file", Some("clip.wav"), &oversized),
        ])
        .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().starts_with("Unknown model size"));

        let leftovers = std::fs::read_dir(&h.config.storage.uploads_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[actix_web::test]
    async fn test_download_transcript() {
        let h = harness();
        let app = test_app!(h.state);

        let req = test::TestRequest::post()
            .uri("/transcribe_youtube")
            .set_json(json!({"url": "https://example.com/videoX"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let record_id = body["transcript_file"].as_str().unwrap().to_string();
        let base = record_id.trim_end_matches(".json");

        let req = test::TestRequest::get()
            .uri(&format!("/download_transcript/{}?format=txt", record_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment"));
        assert!(disposition.contains(&format!("{}.txt", base)));
        assert_eq!(test::read_body(resp).await, "hello from the fake model");

        let req = test::TestRequest::get()
            .uri(&format!("/download_transcript/{}", record_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let stored = std::fs::read(h.config.storage.transcripts_dir.join(&record_id)).unwrap();
        assert_eq!(test::read_body(resp).await, stored);

        let req = test::TestRequest::get()
            .uri("/download_transcript/missing.json?format=docx")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "not_found");
    }

    #[actix_web::test]
    async fn test_cancel_then_job_is_cancelled() {
        let h = harness();
        let app = test_app!(h.state);

        let req = test::TestRequest::post().uri("/cancel_transcription").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);

        let req = test::TestRequest::post()
            .uri("/transcribe_youtube")
            .set_json(json!({"url": "https://example.com/videoX"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["kind"], "cancelled");

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let metrics: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(metrics["jobs"]["cancelled"], 1);
        assert_eq!(metrics["overall"]["total_errors"], 1);
        let endpoints = metrics["endpoints"].as_array().unwrap();
        assert!(endpoints.iter().any(|e| e["endpoint"] == "POST /transcribe_youtube"));
    }

    #[actix_web::test]
    async fn test_health_and_status() {
        let h = harness();
        let app = test_app!(h.state);

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model"], "tiny");

        let req = test::TestRequest::get().uri("/status").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["youtube_available"], true);
        assert_eq!(body["ffmpeg_available"], false);
        assert_eq!(body["loaded_model"], "tiny");
        assert_eq!(body["supported_formats"].as_array().unwrap().len(), 8);
        assert_eq!(body["models"].as_array().unwrap().len(), 5);
        assert!(body["installation_help"]["ffmpeg"].is_string());
    }

    #[actix_web::test]
    async fn test_health_reports_load_failure() {
        let h = harness_with(FakeLoader::failing("weights missing"));
        let app = test_app!(h.state);

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "unhealthy");
        assert!(body["error"].as_str().unwrap().contains("weights missing"));
    }
}
