//! `GET /download_transcript/{id}?format=json|txt|docx`

use crate::error::AppResult;
use crate::state::AppState;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub format: Option<String>,
}

/// Send a stored transcript as an attachment. Unknown formats get the JSON record.
pub async fn download_transcript(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<DownloadQuery>,
) -> AppResult<HttpResponse> {
    let record_id = path.into_inner();
    let format = query.format.as_deref().unwrap_or("json");

    let export = state.service.export(&record_id, format)?;
    tracing::debug!(record_id = %record_id, format = export.format.extension(), bytes = export.bytes.len(), "Exporting transcript");

    Ok(HttpResponse::Ok()
        .content_type(export.format.content_type())
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(export.filename)],
        })
        .body(export.bytes))
}
