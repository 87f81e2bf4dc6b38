//! HTTP surface: ingest, query and mirror endpoints.

use std::sync::Arc;

use actix_web::web;

use crate::config::ServiceSettings;
use crate::mirror::MirrorHandle;
use crate::store::LocationStore;

pub mod error;
pub mod handlers;

/// Shared state injected into every handler.
pub struct AppState {
    pub store: Arc<dyn LocationStore>,
    pub mirror: MirrorHandle,
    pub settings: ServiceSettings,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::QueryConfig::default().error_handler(error::query_error_handler))
        .service(
            web::resource("/api/update/")
                .route(web::post().to(handlers::update_location))
                .default_service(web::route().to(error::method_not_allowed)),
        )
        .service(
            web::resource("/api/latest/")
                .route(web::get().to(handlers::latest_location))
                .default_service(web::route().to(error::method_not_allowed)),
        )
        .service(
            web::resource("/api/history/")
                .route(web::get().to(handlers::location_history))
                .default_service(web::route().to(error::method_not_allowed)),
        )
        .service(
            web::resource("/api/mirror/latest/")
                .route(web::get().to(handlers::mirror_latest))
                .default_service(web::route().to(error::method_not_allowed)),
        )
        .service(
            web::resource("/api/mirror/init/")
                .route(web::post().to(handlers::mirror_init))
                .default_service(web::route().to(error::method_not_allowed)),
        )
        .default_service(web::route().to(error::not_found));
}
