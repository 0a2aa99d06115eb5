//! HTTP front for the dashboard: `GET /api/shelters` and `GET /api/health`.
//!
//! The pipeline is blocking, so each request runs it on actix's blocking
//! thread pool.

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use serde::Serialize;
use std::sync::Arc;

use crate::api::{CatalogSource, Geocoder};
use crate::config::ServerConfig;
use crate::error::ShelterError;
use crate::pipeline::AvailabilityPipeline;

pub struct AppState<C, G> {
    pub pipeline: Arc<AvailabilityPipeline<C, G>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

async fn shelters<C, G>(state: web::Data<AppState<C, G>>) -> HttpResponse
where
    C: CatalogSource + Send + Sync + 'static,
    G: Geocoder + Send + Sync + 'static,
{
    let pipeline = Arc::clone(&state.pipeline);
    match web::block(move || pipeline.run_response()).await {
        Ok(Ok(response)) => HttpResponse::Ok().json(response),
        Ok(Err(e @ ShelterError::UpstreamUnavailable(_))) => {
            log::error!("{}", e);
            HttpResponse::BadGateway().json(ErrorBody {
                error: e.to_string(),
            })
        }
        Ok(Err(e)) => {
            log::error!("{}", e);
            HttpResponse::InternalServerError().json(ErrorBody {
                error: e.to_string(),
            })
        }
        Err(e) => {
            log::error!("Pipeline task failed: {}", e);
            HttpResponse::InternalServerError().json(ErrorBody {
                error: "internal error".to_string(),
            })
        }
    }
}

pub fn routes<C, G>(cfg: &mut web::ServiceConfig)
where
    C: CatalogSource + Send + Sync + 'static,
    G: Geocoder + Send + Sync + 'static,
{
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health))
            .route("/shelters", web::get().to(shelters::<C, G>)),
    );
}

/// Serve the pipeline until the server is stopped
pub async fn run<C, G>(
    pipeline: AvailabilityPipeline<C, G>,
    config: &ServerConfig,
) -> std::io::Result<()>
where
    C: CatalogSource + Send + Sync + 'static,
    G: Geocoder + Send + Sync + 'static,
{
    let state = web::Data::new(AppState {
        pipeline: Arc::new(pipeline),
    });

    log::info!("Starting server on {}:{}", config.bind, config.port);

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(routes::<C, G>)
    })
    .bind((config.bind.as_str(), config.port))?
    .run()
    .await
}
