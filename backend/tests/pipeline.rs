use std::io::Cursor;
use std::sync::Arc;

use actix_web::{test, web, App};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, RgbImage};
use serde_json::Value;
use uuid::Uuid;

use backend::db::{HistoryStore, MemoryRepository};
use backend::detect::batch::{batch_detect, CancelToken};
use backend::detect::model::{DetectionModel, ModelInfo};
use backend::detect::{DetectError, DetectionConfig, ModelProvider};
use backend::routes::configure_routes;
use shared::{BoundingBox, DiseaseClass, RawDetection};

/// Fake model that returns the same detections for every image.
struct ScriptedModel {
    detections: Vec<RawDetection>,
}

impl DetectionModel for ScriptedModel {
    fn forward(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, DetectError> {
        Ok(self.detections.clone())
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            source: "scripted".to_string(),
            device: "cpu".to_string(),
            input_size: 64,
        }
    }
}

fn detection(class: DiseaseClass, confidence: f32, bbox: BoundingBox) -> RawDetection {
    RawDetection {
        class,
        confidence,
        bbox,
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

fn app_state(
    detections: Vec<RawDetection>,
    repo: MemoryRepository,
) -> (
    web::Data<ModelProvider>,
    web::Data<HistoryStore>,
    web::Data<DetectionConfig>,
) {
    let provider = ModelProvider::with_model(Arc::new(ScriptedModel { detections }));
    (
        web::Data::new(provider),
        web::Data::new(HistoryStore::Memory(repo)),
        web::Data::new(DetectionConfig::default()),
    )
}

macro_rules! build_app {
    ($provider:expr, $store:expr, $config:expr) => {
        test::init_service(
            App::new()
                .app_data($provider.clone())
                .app_data($store.clone())
                .app_data($config.clone())
                .configure(configure_routes),
        )
        .await
    };
}

fn detect_body(image: &[u8]) -> Value {
    serde_json::json!({ "image": BASE64.encode(image) })
}

#[actix_web::test]
async fn diseased_image_flows_through_detect_history_and_stats() {
    // one lesion covering 30% of a 100x100 image
    let (provider, store, config) = app_state(
        vec![detection(
            DiseaseClass::EarlyBlight,
            0.85,
            BoundingBox::new(0.0, 0.0, 60.0, 50.0),
        )],
        MemoryRepository::new(),
    );
    let app = build_app!(provider, store, config);
    let user = Uuid::new_v4();

    let req = test::TestRequest::post()
        .uri("/api/detect")
        .insert_header(("X-User-Id", user.to_string()))
        .set_json(detect_body(&png_bytes(100, 100)))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["disease_detected"], true);
    assert_eq!(body["disease_type"], "early_blight");
    assert_eq!(body["severity_level"], "Medium");
    assert!((body["severity_percentage"].as_f64().unwrap() - 30.0).abs() < 0.01);
    assert!(body["treatment_recommendation"].as_str().unwrap().len() > 0);
    assert_eq!(body["persisted"], true);

    let req = test::TestRequest::get()
        .uri("/api/history")
        .insert_header(("X-User-Id", user.to_string()))
        .to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history["total"], 1);
    assert_eq!(history["current_page"], 1);
    assert_eq!(history["history"][0]["id"], body["id"]);

    let req = test::TestRequest::get()
        .uri("/api/stats")
        .insert_header(("X-User-Id", user.to_string()))
        .to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["total_detections"], 1);
    assert_eq!(stats["diseased_detections"], 1);
    assert_eq!(stats["detection_rate"].as_f64().unwrap(), 100.0);
}

#[actix_web::test]
async fn healthy_image_reports_null_severity_and_care_advice() {
    let (provider, store, config) = app_state(
        vec![detection(
            DiseaseClass::Healthy,
            0.97,
            BoundingBox::new(0.0, 0.0, 100.0, 100.0),
        )],
        MemoryRepository::new(),
    );
    let app = build_app!(provider, store, config);

    let req = test::TestRequest::post()
        .uri("/api/detect")
        .insert_header(("X-User-Id", Uuid::new_v4().to_string()))
        .set_json(detect_body(&png_bytes(100, 100)))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["disease_detected"], false);
    assert_eq!(body["disease_type"], Value::Null);
    assert_eq!(body["severity_level"], Value::Null);
    assert_eq!(body["severity_percentage"].as_f64().unwrap(), 0.0);
    assert!(body["treatment_recommendation"]
        .as_str()
        .unwrap()
        .contains("No treatment needed"));
}

#[actix_web::test]
async fn undecodable_image_is_a_bad_request_not_a_healthy_result() {
    let (provider, store, config) = app_state(vec![], MemoryRepository::new());
    let app = build_app!(provider, store, config);
    let user = Uuid::new_v4();

    let req = test::TestRequest::post()
        .uri("/api/detect")
        .insert_header(("X-User-Id", user.to_string()))
        .set_json(detect_body(b"definitely not an image"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "invalid_image_error");

    // nothing reached the store
    let req = test::TestRequest::get()
        .uri("/api/stats")
        .insert_header(("X-User-Id", user.to_string()))
        .to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["total_detections"], 0);
}

#[actix_web::test]
async fn data_url_prefixes_are_accepted() {
    let (provider, store, config) = app_state(
        vec![detection(
            DiseaseClass::Healthy,
            0.9,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        )],
        MemoryRepository::new(),
    );
    let app = build_app!(provider, store, config);

    let encoded = format!(
        "data:image/png;base64,{}",
        BASE64.encode(png_bytes(32, 32))
    );
    let req = test::TestRequest::post()
        .uri("/api/detect")
        .insert_header(("X-User-Id", Uuid::new_v4().to_string()))
        .set_json(serde_json::json!({ "image": encoded }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn requests_without_identity_are_unauthorized() {
    let (provider, store, config) = app_state(vec![], MemoryRepository::new());
    let app = build_app!(provider, store, config);

    for uri in ["/api/history", "/api/stats"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401, "{uri}");
    }
}

#[actix_web::test]
async fn storage_failure_still_returns_the_diagnosis() {
    let repo = MemoryRepository::new();
    repo.fail_next_appends(2); // first try and its retry
    let (provider, store, config) = app_state(
        vec![detection(
            DiseaseClass::LateBlight,
            0.8,
            BoundingBox::new(0.0, 0.0, 80.0, 80.0),
        )],
        repo,
    );
    let app = build_app!(provider, store, config);

    let req = test::TestRequest::post()
        .uri("/api/detect")
        .insert_header(("X-User-Id", Uuid::new_v4().to_string()))
        .set_json(detect_body(&png_bytes(100, 100)))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["disease_detected"], true);
    assert_eq!(body["persisted"], false);
}

#[actix_web::test]
async fn history_pages_partition_the_records() {
    let (provider, store, config) = app_state(
        vec![detection(
            DiseaseClass::Healthy,
            0.9,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        )],
        MemoryRepository::new(),
    );
    let app = build_app!(provider, store, config);
    let user = Uuid::new_v4();

    for _ in 0..12 {
        let req = test::TestRequest::post()
            .uri("/api/detect")
            .insert_header(("X-User-Id", user.to_string()))
            .set_json(detect_body(&png_bytes(32, 32)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    let mut seen = 0;
    for page in 1..=3 {
        let req = test::TestRequest::get()
            .uri(&format!("/api/history?page={page}&per_page=5"))
            .insert_header(("X-User-Id", user.to_string()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 12);
        assert_eq!(body["pages"], 3);
        seen += body["history"].as_array().unwrap().len();
    }
    assert_eq!(seen, 12);

    // out of range is empty, not an error
    let req = test::TestRequest::get()
        .uri("/api/history?page=9&per_page=5")
        .insert_header(("X-User-Id", user.to_string()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["history"].as_array().unwrap().is_empty());
    assert_eq!(body["total"], 12);
}

#[actix_web::test]
async fn purge_empties_history_for_that_user_only() {
    let (provider, store, config) = app_state(
        vec![detection(
            DiseaseClass::Healthy,
            0.9,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        )],
        MemoryRepository::new(),
    );
    let app = build_app!(provider, store, config);
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    for user in [alice, alice, bob] {
        let req = test::TestRequest::post()
            .uri("/api/detect")
            .insert_header(("X-User-Id", user.to_string()))
            .set_json(detect_body(&png_bytes(32, 32)))
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::delete()
        .uri("/api/history")
        .insert_header(("X-User-Id", alice.to_string()))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["deleted"], 2);

    let req = test::TestRequest::get()
        .uri("/api/stats")
        .insert_header(("X-User-Id", bob.to_string()))
        .to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["total_detections"], 1);
}

#[actix_web::test]
async fn model_info_reports_the_loaded_model_and_tunables() {
    let (provider, store, config) = app_state(vec![], MemoryRepository::new());
    let app = build_app!(provider, store, config);

    let req = test::TestRequest::get().uri("/api/model/info").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["loaded"], true);
    assert_eq!(body["model"]["source"], "scripted");
    assert_eq!(body["thresholds"]["confidence"].as_f64().unwrap(), 0.25);
}

#[tokio::test]
async fn batch_results_keep_slot_order_around_a_bad_image() {
    let model: Arc<dyn DetectionModel> = Arc::new(ScriptedModel {
        detections: vec![detection(
            DiseaseClass::TargetSpot,
            0.7,
            BoundingBox::new(0.0, 0.0, 40.0, 40.0),
        )],
    });
    let config = DetectionConfig::default();
    let images = vec![
        png_bytes(64, 64),
        b"corrupt".to_vec(),
        png_bytes(64, 64),
    ];

    let results = batch_detect(
        model,
        Uuid::new_v4(),
        images,
        &config,
        &CancelToken::new(),
    )
    .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(DetectError::InvalidImage(_))));
    assert!(results[2].is_ok());
}
