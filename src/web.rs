use crate::{
    errors::RetrievalError,
    gateway::{Gateway, RetrievalRequest, Strategy},
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

pub struct SharedState {
    pub gateway: Gateway,
    /// Hides error chains from responses
    pub production: bool,
}

impl SharedState {
    pub fn new(gateway: Gateway) -> Self {
        let production = gateway.config().production;
        Self {
            gateway,
            production,
        }
    }

    fn error(&self, surface: Surface) -> impl Fn(RetrievalError) -> HttpError + '_ {
        move |err| HttpError {
            surface,
            err,
            production: self.production,
        }
    }
}

pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/", get(root).fallback(only_get))
        .route("/ttdl", get(ttdl).fallback(only_get))
        .route(
            "/download-tiktok",
            post(download_tiktok).fallback(only_post),
        )
        .route("/tiktok", post(tiktok).fallback(only_post))
        .route(
            "/enhance-image-from-url",
            post(enhance_image).fallback(only_post),
        )
        .route("/retrieve", post(retrieve).fallback(only_post))
        .fallback(not_found)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

pub async fn serve(gateway: Gateway, listen: &str) -> anyhow::Result<()> {
    let app = router(Arc::new(SharedState::new(gateway)));

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("listening on {listen}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::warn!("ctrl+c received, shutting down"),
        _ = terminate => log::warn!("SIGTERM received, shutting down"),
    }
}

/// Which endpoint produced an error. Each keeps its own error body shape.
#[derive(Debug, Clone, Copy)]
enum Surface {
    Ttdl,
    DownloadTiktok,
    Edge,
    Enhance,
    Retrieve,
}

#[derive(Debug)]
struct HttpError {
    surface: Surface,
    err: RetrievalError,
    production: bool,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        use RetrievalError::*;

        let status = match self.err {
            InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            log::error!("{:?}: {:?}", self.surface, self.err);
        }

        let message = self.err.to_string();
        let body = match self.surface {
            Surface::Ttdl => match &self.err {
                InvalidInput(_) => json!({"error": "Invalid url", "detail": message}),
                DownloadFailed { .. } => json!({"error": "Download failed", "detail": message}),
                _ => json!({"error": "Processing failed", "detail": message}),
            },
            Surface::DownloadTiktok => match &self.err {
                InvalidInput(_) => json!({"error": message}),
                ExtractionFailed {
                    upstream_status: Some(code),
                    ..
                } => json!({
                    "error": format!("Failed to fetch from external service. Status: {code}"),
                    "details": message,
                }),
                ExtractionFailed { .. } => json!({
                    "error": "Failed to find video download URL from DLPanda.com. The site structure may have changed or the video is unavailable."
                }),
                UpstreamUnreachable { .. } => json!({
                    "error": "No response received from external service.",
                    "details": message,
                }),
                _ => json!({"error": "An unexpected error occurred.", "details": message}),
            },
            Surface::Edge => match &self.err {
                InvalidInput(_) => json!({"error": "Invalid TikTok URL"}),
                ExtractionFailed { .. } => json!({"error": "Failed to fetch download link"}),
                _ => json!({"error": "Something went wrong"}),
            },
            Surface::Enhance => match &self.err {
                ModelResponseEmpty => json!({"error": message}),
                InvalidInput(_) => json!({
                    "error": "Please provide a valid 'imageUrl' in the request body.",
                    "details": message,
                }),
                _ => {
                    let mut body = json!({"error": "Failed to enhance image", "details": message});
                    if !self.production {
                        body["stack"] = json!(format!("{:#?}", self.err));
                    }
                    body
                }
            },
            Surface::Retrieve => json!(self.err.report()),
        };

        (status, Json(body)).into_response()
    }
}

fn reject(error: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response()
}

async fn only_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "Only GET allowed"})),
    )
        .into_response()
}

async fn only_post() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "Only POST allowed"})),
    )
        .into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"}))).into_response()
}

async fn root() -> &'static str {
    "Artifact gateway is running!"
}

#[derive(Debug, Deserialize)]
pub struct TtdlQuery {
    pub url: Option<String>,
}

async fn ttdl(
    State(state): State<Arc<SharedState>>,
    Query(query): Query<TtdlQuery>,
) -> Result<Response, HttpError> {
    log::debug!("query: {query:?}");

    let Some(url) = query.url.filter(|u| !u.trim().is_empty()) else {
        return Ok(reject("Missing ?url=https://tiktok.com/... parameter"));
    };

    let result = state
        .gateway
        .retrieve(&RetrievalRequest::new(url, Strategy::Browser))
        .await
        .map_err(state.error(Surface::Ttdl))?;

    Ok(Json(json!({
        "success": true,
        "base64": result.data_uri(),
        "size": result.size_bytes,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct DownloadTiktokRequest {
    #[serde(default)]
    pub tiktok_url: Option<String>,
}

async fn download_tiktok(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<DownloadTiktokRequest>, JsonRejection>,
) -> Result<Response, HttpError> {
    let tiktok_url = payload
        .ok()
        .and_then(|Json(p)| p.tiktok_url)
        .filter(|u| !u.trim().is_empty());
    let Some(tiktok_url) = tiktok_url else {
        return Ok(reject("Missing 'tiktok_url' in request body."));
    };

    log::debug!("tiktok_url: {tiktok_url}");

    let result = state
        .gateway
        .retrieve(&RetrievalRequest::new(
            tiktok_url.clone(),
            Strategy::DirectRedirect,
        ))
        .await
        .map_err(state.error(Surface::DownloadTiktok))?;

    Ok(Json(json!({
        "status": "success",
        "tiktok_url": tiktok_url,
        "video_base64": result.artifact_base64,
        "message": "Video successfully downloaded and encoded to Base64.",
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct EdgeRequest {
    #[serde(default)]
    pub url: Option<String>,

    /// Answer with the extracted link instead of the video
    #[serde(default)]
    pub link_only: bool,
}

async fn tiktok(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<EdgeRequest>, JsonRejection>,
) -> Result<Response, HttpError> {
    let Ok(Json(payload)) = payload else {
        return Ok(reject("Invalid TikTok URL"));
    };
    log::debug!("payload: {payload:?}");

    let Some(url) = payload.url.filter(|u| u.contains("tiktok.com")) else {
        return Ok(reject("Invalid TikTok URL"));
    };

    let request = RetrievalRequest::new(url, Strategy::FormPost);

    if payload.link_only {
        let link = state
            .gateway
            .extract_link(&request)
            .await
            .map_err(state.error(Surface::Edge))?;
        return Ok(Json(json!({ "url": link.as_str() })).into_response());
    }

    let result = state
        .gateway
        .retrieve(&request)
        .await
        .map_err(state.error(Surface::Edge))?;

    Ok(Json(json!({ "base64": result.data_uri() })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct EnhanceRequest {
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

async fn enhance_image(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<EnhanceRequest>, JsonRejection>,
) -> Result<Response, HttpError> {
    let image_url = payload
        .ok()
        .and_then(|Json(p)| p.image_url)
        .filter(|u| !u.trim().is_empty());
    let Some(image_url) = image_url else {
        return Ok(reject("Please provide an 'imageUrl' in the request body."));
    };

    let result = state
        .gateway
        .retrieve(&RetrievalRequest::new(
            image_url,
            Strategy::GenerativeTransform,
        ))
        .await
        .map_err(state.error(Surface::Enhance))?;

    Ok(Json(json!({
        "image_base64": result.artifact_base64,
        "mime_type": result.mime_type,
    }))
    .into_response())
}

async fn retrieve(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<RetrievalRequest>, JsonRejection>,
) -> Result<Response, HttpError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return Err(state.error(Surface::Retrieve)(RetrievalError::invalid_input(
                rejection.body_text(),
            )))
        }
    };

    log::debug!("payload: {request:?}");

    let result = state
        .gateway
        .retrieve(&request)
        .await
        .map_err(state.error(Surface::Retrieve))?;

    Ok(Json(result).into_response())
}
