use crate::{
    error::{AppError, Result},
    models::{ErrorBody, GenerateRequest, GenerateResponse, UploadRequest, UploadResponse},
    server::{static_files, AppState},
};
use actix_web::{http::header::ContentType, web, HttpRequest, HttpResponse};
use base64::{engine::general_purpose::STANDARD, Engine as _};

const DEFAULT_INDEX: &str = include_str!("../../static/index.html");

/// Fallback for unknown paths and unsupported methods.
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorBody::new("Not found"))
}

pub async fn index(state: web::Data<AppState>) -> HttpResponse {
    let page = tokio::fs::read_to_string(state.static_dir.join("index.html"))
        .await
        .unwrap_or_else(|_| DEFAULT_INDEX.to_string());

    HttpResponse::Ok().content_type(ContentType::html()).body(page)
}

pub async fn static_file(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let Some(file) = static_files::resolve(&state.static_dir, &path).await else {
        return Ok(not_found().await);
    };

    let bytes = tokio::fs::read(&file).await.map_err(|e| {
        AppError::InternalError(format!("Failed to read {}: {}", file.display(), e))
    })?;
    let mime = mime_guess::from_path(&file).first_or_octet_stream();

    Ok(HttpResponse::Ok().content_type(mime.as_ref()).body(bytes))
}

pub async fn generate(
    state: web::Data<AppState>,
    body: web::Json<GenerateRequest>,
) -> Result<HttpResponse> {
    let prompt = body.into_inner().prompt.unwrap_or_default();
    let image = state.inference.generate(&prompt).await?;

    Ok(HttpResponse::Ok().json(GenerateResponse {
        image: STANDARD.encode(image),
    }))
}

pub async fn upload(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<UploadRequest>,
) -> Result<HttpResponse> {
    let payload = body.into_inner().image.unwrap_or_default();

    let base_url = {
        let info = req.connection_info();
        format!("{}://{}", info.scheme(), info.host())
    };

    let stored = state.store.save(&payload, &base_url).await?;
    Ok(HttpResponse::Ok().json(UploadResponse::from(stored)))
}

pub async fn uploaded_image(
    state: web::Data<AppState>,
    filename: web::Path<String>,
) -> Result<HttpResponse> {
    match state.store.read(&filename).await? {
        Some(bytes) => Ok(HttpResponse::Ok().content_type("image/png").body(bytes)),
        None => Ok(not_found().await),
    }
}
