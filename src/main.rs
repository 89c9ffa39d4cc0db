use promptcanvas::{
    logger::{self, LoggerConfig},
    server, AppState, ImageStore, InferenceClient, ServerConfig,
};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let config = ServerConfig::from_env()?;
    logger::init_with_config(LoggerConfig::from_server_config(&config))?;

    if dotenv_loaded {
        log::info!(".env file loaded");
    } else {
        log::debug!("No .env file found, using process environment");
    }

    logger::log_startup_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), &config);
    logger::log_config_info(&config);

    let store = ImageStore::open(&config.upload_dir).await.map_err(|e| {
        log::error!("{}", e);
        e
    })?;

    let inference = InferenceClient::from_config(&config).map_err(|e| {
        log::error!("Failed to initialize {:?} backend: {}", config.backend, e);
        e
    })?;
    log::info!("Image backend ready: {}", inference.backend_name());

    let state = AppState::new(inference, store, &config.static_dir)
        .with_max_body_bytes(config.max_body_bytes);

    server::run(&config, state).await?;
    log::info!("Server stopped");
    Ok(())
}
