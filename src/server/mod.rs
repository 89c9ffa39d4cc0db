pub mod handlers;
pub mod static_files;

use crate::{
    config::ServerConfig, error::AppError, inference::InferenceClient, storage::ImageStore,
};
use actix_web::{middleware, web, App, HttpServer};
use std::path::PathBuf;

/// Shared state handed to every handler.
pub struct AppState {
    pub inference: InferenceClient,
    pub store: ImageStore,
    pub static_dir: PathBuf,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        inference: InferenceClient,
        store: ImageStore,
        static_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inference,
            store,
            static_dir: static_dir.into(),
            max_body_bytes: ServerConfig::default().max_body_bytes,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

/// JSON extractor settings: large enough for base64 images, and body
/// errors answered as `{"error": ...}` like every other failure.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| {
            AppError::InvalidInput(format!("Invalid request body: {}", err)).into()
        })
}

/// Registers state and routes; shared by the server and the test suite.
pub fn configure(state: web::Data<AppState>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(json_config(state.max_body_bytes))
            .app_data(state)
            .route("/", web::get().to(handlers::index))
            .route("/generate", web::post().to(handlers::generate))
            .route("/api/generate", web::post().to(handlers::generate))
            .route("/upload", web::post().to(handlers::upload))
            .route("/api/upload-base64", web::post().to(handlers::upload))
            .route("/uploads/{filename}", web::get().to(handlers::uploaded_image))
            .route("/static/{path:.*}", web::get().to(handlers::static_file))
            .default_service(web::to(handlers::not_found));
    }
}

pub async fn run(config: &ServerConfig, state: AppState) -> std::io::Result<()> {
    let state = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::new("%r -> %s (%b bytes, %Dms)"))
            .configure(configure(state.clone()))
    })
    .bind(config.bind_address())?
    .run()
    .await
}
