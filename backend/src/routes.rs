use actix_web::http::header::CONTENT_TYPE;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_multipart::Multipart;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use shared::DetectionResponse;
use std::io::Write;

use crate::auth::UserId;
use crate::db::{HistoryStore, DEFAULT_PER_PAGE};
use crate::detect::batch::{self, CancelToken};
use crate::detect::treatment::HEALTHY_ADVICE;
use crate::detect::{composer, engine, DetectError, DetectionConfig, ModelProvider};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/detect").route(web::post().to(handle_detect)))
        .service(web::resource("/api/detect/batch").route(web::post().to(handle_batch)))
        .service(
            web::resource("/api/history")
                .route(web::get().to(handle_history))
                .route(web::delete().to(handle_purge)),
        )
        .service(web::resource("/api/stats").route(web::get().to(handle_stats)))
        .service(web::resource("/api/model/info").route(web::get().to(handle_model_info)));
}

#[derive(Deserialize)]
struct Base64Payload {
    image: String,
}

#[derive(Deserialize)]
struct HistoryQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

async fn handle_detect(
    req: HttpRequest,
    payload: web::Payload,
    user: UserId,
    provider: web::Data<ModelProvider>,
    store: web::Data<HistoryStore>,
    config: web::Data<DetectionConfig>,
) -> Result<HttpResponse, Error> {
    let image_bytes = match extract_single_image(&req, payload).await {
        Ok(bytes) => bytes,
        Err(msg) => return Ok(HttpResponse::BadRequest().json(json!({ "error": msg }))),
    };

    let record = {
        let provider = provider.clone();
        let config = config.clone();
        let result = web::block(move || {
            let model = provider.get()?;
            let inference = engine::infer(model.as_ref(), &image_bytes, &config.thresholds)?;
            Ok::<_, DetectError>(composer::compose(user.0, &inference, &config.severity))
        })
        .await?;
        match result {
            Ok(record) => record,
            Err(e) => {
                error!("Detection failed for user {}: {e}", user.0);
                return Ok(detect_error_response(&e));
            }
        }
    };

    let persisted = store.append_with_retry(&record).await;
    info!(
        "Diagnosis {} for user {}: diseased={} persisted={persisted}",
        record.id, user.0, record.disease_detected
    );
    Ok(HttpResponse::Ok().json(render_diagnosis(&record, persisted)))
}

async fn handle_batch(
    mut payload: Multipart,
    user: UserId,
    provider: web::Data<ModelProvider>,
    store: web::Data<HistoryStore>,
    config: web::Data<DetectionConfig>,
) -> Result<HttpResponse, Error> {
    let mut images: Vec<Vec<u8>> = Vec::new();
    while let Ok(Some(mut field)) = payload.try_next().await {
        let mut image_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            image_data.write_all(&data)?;
        }
        if !image_data.is_empty() {
            images.push(image_data);
        }
    }

    if images.is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "No images provided" })));
    }

    let model = {
        let provider = provider.clone();
        match web::block(move || provider.get()).await? {
            Ok(model) => model,
            Err(e) => {
                error!("Model unavailable for batch from user {}: {e}", user.0);
                return Ok(detect_error_response(&e));
            }
        }
    };

    let count = images.len();
    let outcomes = batch::batch_detect(model, user.0, images, &config, &CancelToken::new()).await;

    let mut results = Vec::with_capacity(outcomes.len());
    for outcome in &outcomes {
        match outcome {
            Ok(record) => {
                let persisted = store.append_with_retry(record).await;
                results.push(json!({ "result": render_diagnosis(record, persisted) }));
            }
            Err(e) => {
                results.push(json!({ "error": e.to_string(), "kind": e.kind() }));
            }
        }
    }

    info!(
        "Batch of {count} for user {}: {} succeeded",
        user.0,
        outcomes.iter().filter(|r| r.is_ok()).count()
    );
    Ok(HttpResponse::Ok().json(json!({ "results": results })))
}

async fn handle_history(
    user: UserId,
    query: web::Query<HistoryQuery>,
    store: web::Data<HistoryStore>,
) -> HttpResponse {
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE);

    match store.list_page(user.0, page, per_page).await {
        Ok(window) => {
            let history: Vec<DetectionResponse> = window
                .history
                .iter()
                .map(|record| render_diagnosis(record, true))
                .collect();
            HttpResponse::Ok().json(json!({
                "history": history,
                "total": window.total,
                "pages": window.pages,
                "current_page": window.current_page,
                "per_page": window.per_page,
            }))
        }
        Err(e) => {
            error!("History lookup failed for user {}: {e}", user.0);
            HttpResponse::Ok().json(json!({
                "history": [],
                "total": 0,
                "pages": 0,
                "current_page": page,
                "per_page": per_page,
                "error": "History is temporarily unavailable",
            }))
        }
    }
}

async fn handle_stats(user: UserId, store: web::Data<HistoryStore>) -> HttpResponse {
    match store.stats(user.0).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Stats lookup failed for user {}: {e}", user.0);
            HttpResponse::Ok().json(json!({
                "total_detections": 0,
                "diseased_detections": 0,
                "healthy_detections": 0,
                "detection_rate": 0.0,
                "error": "Stats are temporarily unavailable",
            }))
        }
    }
}

async fn handle_purge(user: UserId, store: web::Data<HistoryStore>) -> HttpResponse {
    match store.purge_user(user.0).await {
        Ok(deleted) => {
            info!("Purged {deleted} records for user {}", user.0);
            HttpResponse::Ok().json(json!({ "deleted": deleted }))
        }
        Err(e) => {
            error!("Purge failed for user {}: {e}", user.0);
            HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to delete history" }))
        }
    }
}

async fn handle_model_info(
    provider: web::Data<ModelProvider>,
    config: web::Data<DetectionConfig>,
) -> HttpResponse {
    let model = provider.current().map(|m| m.info());
    HttpResponse::Ok().json(json!({
        "model": model,
        "loaded": provider.current().is_some(),
        "thresholds": config.thresholds,
        "severity": config.severity,
    }))
}

/// Pulls one image out of the request: the first non-empty multipart file
/// field, or the `image` member of a JSON body, base64 with an optional
/// data-URL prefix.
async fn extract_single_image(
    req: &HttpRequest,
    mut payload: web::Payload,
) -> Result<Vec<u8>, String> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("multipart/") {
        let mut multipart = Multipart::new(req.headers(), payload);
        while let Ok(Some(mut field)) = multipart.try_next().await {
            let mut image_data = Vec::new();
            while let Some(chunk) = field.next().await {
                let data = chunk.map_err(|e| format!("Malformed multipart body: {e}"))?;
                image_data.extend_from_slice(&data);
            }
            if !image_data.is_empty() {
                return Ok(image_data);
            }
        }
        return Err("No image provided".to_string());
    }

    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let data = chunk.map_err(|e| format!("Failed to read request body: {e}"))?;
        body.extend_from_slice(&data);
    }

    let parsed: Base64Payload = serde_json::from_slice(&body)
        .map_err(|_| "Expected multipart form data or a JSON body with an \"image\" field")?;
    // data URLs carry "data:image/...;base64," before the payload
    let encoded = parsed
        .image
        .rsplit_once(',')
        .map(|(_, data)| data)
        .unwrap_or(&parsed.image);
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| format!("Invalid base64 image data: {e}"))?;
    if bytes.is_empty() {
        return Err("No image provided".to_string());
    }
    Ok(bytes)
}

/// Healthy diagnoses carry standing care advice on the wire even though no
/// treatment is stored with the record.
fn render_diagnosis(record: &shared::DiagnosisRecord, persisted: bool) -> DetectionResponse {
    let mut response = DetectionResponse::from_record(record, persisted);
    if !record.disease_detected {
        response.treatment_recommendation = Some(HEALTHY_ADVICE.to_string());
    }
    response
}

fn detect_error_response(err: &DetectError) -> HttpResponse {
    let body = json!({ "error": err.to_string(), "kind": err.kind() });
    match err {
        DetectError::InvalidImage(_) => HttpResponse::BadRequest().json(body),
        DetectError::Timeout(_) => HttpResponse::GatewayTimeout().json(body),
        DetectError::ModelLoad(_) => {
            warn!("Model artifact unavailable: {err}");
            HttpResponse::InternalServerError().json(body)
        }
        _ => HttpResponse::InternalServerError().json(body),
    }
}
