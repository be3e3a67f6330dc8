use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chain_data::BlockSelector;
use melody_core::MusicConfig;
use music_engine::{
    export, CancellationToken, EngineError, EngineState, ExportError, ExportOptions, FrameExtractor, GenerateRequest,
    GenerateResponse, MusicEngine, PreviewCache,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MusicEngine>,
    pub previews: Arc<PreviewCache<Arc<dyn FrameExtractor>>>,
}

pub fn make_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/state", get(engine_state))
        .route("/generate", post(generate))
        .route("/reset", post(reset))
        .route("/preview", get(preview))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Export(ExportError),
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        ApiError::Export(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use music_engine::ErrorKind;

        let (status, kind, message) = match self {
            ApiError::Engine(e) => {
                let status = match &e {
                    EngineError::Busy => StatusCode::CONFLICT,
                    EngineError::PersistUnavailable | EngineError::NothingToResume => StatusCode::BAD_REQUEST,
                    other => match other.kind() {
                        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                        ErrorKind::Network | ErrorKind::Storage | ErrorKind::Transaction => StatusCode::BAD_GATEWAY,
                        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                        ErrorKind::Config | ErrorKind::Render => StatusCode::INTERNAL_SERVER_ERROR,
                    },
                };
                (status, e.kind().to_string(), e.to_string())
            }
            ApiError::Export(e) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Render.to_string(), e.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, ErrorKind::Validation.to_string(), message),
        };
        if status.is_server_error() {
            warn!(%status, kind = %kind, error = %message, "request failed");
        }
        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}

async fn engine_state(State(app): State<AppState>) -> Json<EngineState> {
    Json(app.engine.state())
}

async fn reset(State(app): State<AppState>) -> Json<EngineState> {
    app.engine.reset();
    Json(app.engine.state())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    /// Music settings for this run; the service defaults when omitted.
    #[serde(default)]
    config: Option<MusicConfig>,
    #[serde(default)]
    block: Option<u64>,
    #[serde(default)]
    persist: bool,
    /// Include every video frame in the response.
    #[serde(default)]
    frames: bool,
}

async fn generate(State(app): State<AppState>, Json(body): Json<GenerateBody>) -> Result<Json<GenerateResponse>, ApiError> {
    let mut request = GenerateRequest {
        block: body.block.map_or(BlockSelector::Latest, BlockSelector::Number),
        persist: body.persist,
        ..GenerateRequest::latest()
    };
    if let Some(music) = body.config {
        request = request.with_music(music);
    }
    info!(block = %request.block, persist = request.persist, "generate requested");

    let out = app.engine.run(request, CancellationToken::new()).await?;
    let artifacts = export(&out, ExportOptions { frames: body.frames })?;
    Ok(Json(GenerateResponse { state: app.engine.state(), artifacts }))
}

#[derive(Debug, Deserialize)]
struct PreviewQuery {
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PreviewResponse {
    url: String,
    data_url: String,
}

async fn preview(State(app): State<AppState>, Query(q): Query<PreviewQuery>) -> Result<Json<PreviewResponse>, ApiError> {
    let url = q.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ApiError::BadRequest(format!("'{url}' is not an http(s) URL")));
    }
    let data_url = app.previews.get(url).await;
    Ok(Json(PreviewResponse { url: url.to_string(), data_url }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use chain_data::{BigUint, ChainSnapshot, FixedSource};
    use music_engine::{EngineConfig, ExtractError, VisualConfig};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    struct EchoExtractor;

    #[async_trait::async_trait]
    impl FrameExtractor for EchoExtractor {
        async fn extract(&self, url: &str) -> Result<String, ExtractError> {
            Ok(format!("data:image/png;base64,{}", url.len()))
        }
    }

    fn test_app() -> Router {
        let snapshot =
            ChainSnapshot::new(33139, BigUint::from(12345u32), BigUint::from(2_000_000_000u64), 1_700_000_000, &["0xaa"]);
        let config = EngineConfig {
            visual: VisualConfig { width: 16, height: 9, fps: 1 },
            snapshot_max_age: None,
            ..EngineConfig::default()
        };
        let music = MusicConfig { duration: 1, ..MusicConfig::default() };
        let engine = MusicEngine::builder(config, music)
            .chain_source(Arc::new(FixedSource::new(snapshot)))
            .build()
            .unwrap();
        let extractor: Arc<dyn FrameExtractor> = Arc::new(EchoExtractor);
        make_app(AppState {
            engine: Arc::new(engine),
            previews: Arc::new(PreviewCache::new(extractor, Duration::from_secs(1))),
        })
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_initial_state() {
        let app = test_app();
        let (status, _) = call(&app, Request::builder().uri("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, state) = call(&app, Request::builder().uri("/state").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state["status"], "idle");
        assert_eq!(state["currentStep"], "Ready");
    }

    #[tokio::test]
    async fn test_generate_returns_artifacts() {
        let app = test_app();
        let body = json!({
            "config": { "chainId": 33139, "style": "lofi-hiphop", "duration": 1, "lofiSettings": { "bpmRange": [70, 90] } },
            "block": 12345
        });
        let (status, response) = call(&app, post_json("/generate", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["state"]["status"], "complete");
        assert_eq!(response["state"]["progress"], 100);
        assert_eq!(response["artifacts"][0]["WavBase64"]["name"], "track.wav");
        assert_eq!(response["artifacts"][2]["Json"]["data"]["tempoBpm"], 75);

        let (_, state) = call(&app, post_json("/reset", Value::Null)).await;
        assert_eq!(state["status"], "idle");
        assert_eq!(state["progress"], 0);
    }

    #[tokio::test]
    async fn test_generate_rejects_invalid_config() {
        let app = test_app();
        let body = json!({ "config": { "chainId": 33139, "style": "lofi-hiphop", "duration": 0 } });
        let (status, response) = call(&app, post_json("/generate", body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response["kind"], "validation");

        let (status, _) = call(&app, post_json("/generate", json!({ "persist": true }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_preview_is_cached_per_url() {
        let app = test_app();
        let uri = "/preview?url=https%3A%2F%2Fexample.com%2Ftest.mp4";
        let (status, first) = call(&app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["url"], "https://example.com/test.mp4");
        let (_, second) = call(&app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(first, second);

        let bad = Request::builder().uri("/preview?url=ftp%3A%2F%2Fx").body(Body::empty()).unwrap();
        let (status, _) = call(&app, bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
