use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::env;

use backend::db::HistoryStore;
use backend::detect::{treatment, DetectionConfig, ModelProvider};
use backend::routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = match DetectionConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Failed to load detection config, using defaults: {e}");
            DetectionConfig::default()
        }
    };
    log::info!(
        "Detection config: model={} input={} conf={} iou={}",
        config.model.path,
        config.model.input_size,
        config.thresholds.confidence,
        config.thresholds.iou
    );

    if let Err(e) = treatment::validate_table() {
        log::error!("Treatment table is incomplete: {e}");
        return Err(std::io::Error::other(format!(
            "Treatment table validation failed: {e}"
        )));
    }

    // The model artifact is loaded on first use, not here; a cold store
    // should still be able to serve history and stats.
    let provider = ModelProvider::new(config.model.clone());

    let store = match env::var("DYNAMODB_DETECTIONS_TABLE") {
        Ok(table) => {
            let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
            log::info!("Using DynamoDB detections table '{table}'");
            HistoryStore::dynamo(DynamoDbClient::new(&aws_config), table)
        }
        Err(_) => {
            log::warn!(
                "DYNAMODB_DETECTIONS_TABLE is not set; history will not survive restarts"
            );
            HistoryStore::memory()
        }
    };

    let provider = web::Data::new(provider);
    let store = web::Data::new(store);
    let config = web::Data::new(config);

    let port = env::var("PORT").unwrap_or_else(|_| "8081".to_string());
    let bind_address = format!("0.0.0.0:{}", port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .allowed_header("x-user-id")
                    .max_age(3600),
            )
            .app_data(provider.clone())
            .app_data(store.clone())
            .app_data(config.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
