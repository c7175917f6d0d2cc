use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `POST /cancel_transcription`
///
/// Always succeeds. The running job stops at its next checkpoint; with no job
/// running, the next job to start is cancelled instead.
pub async fn cancel_transcription(state: web::Data<AppState>) -> HttpResponse {
    state.service.cancel();

    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Transcription cancellation requested",
    }))
}
