//! A small authenticated HTTP front end over [`batch::run`].
//!
//! `POST /` accepts the same parameters as the command line as JSON and
//! answers with the batch report. Requests that override configuration get a
//! generator of their own, but every generator shares one in-flight map so
//! identical concurrent requests still submit once.

use crate::batch::{self, BatchRequest};
use crate::cache::InFlight;
use crate::config::{Config, ConfigOverrides};
use crate::error::VeoError;
use crate::generator::VideoGenerator;
use crate::prompt::PromptOptions;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Unauthorized: invalid or missing API key")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] VeoError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(err) => {
                tracing::error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub struct ProxyState {
    secret: String,
    base: ConfigOverrides,
    default_generator: Option<VideoGenerator>,
    inflight: InFlight,
    cancel: CancellationToken,
}

impl ProxyState {
    /// `base` is applied under every request's own overrides. When it resolves
    /// on its own, the resulting generator serves requests without overrides.
    pub async fn new(secret: impl Into<String>, base: ConfigOverrides) -> Self {
        let inflight = InFlight::new();
        let default_generator = match Config::resolve(&base) {
            Ok(config) => match VideoGenerator::new(&config).await {
                Ok(generator) => Some(generator.with_inflight(inflight.clone())),
                Err(err) => {
                    tracing::warn!(error = %err, "default generator unavailable");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "no default configuration; requests must supply api_key");
                None
            }
        };

        Self {
            secret: secret.into(),
            base,
            default_generator,
            inflight,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token aborts every in-flight poll.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), ProxyError> {
        match presented_key(headers) {
            Some(key) if key == self.secret => Ok(()),
            _ => Err(ProxyError::Unauthorized),
        }
    }

    async fn generator_for(&self, overrides: &ConfigOverrides) -> Result<VideoGenerator, VeoError> {
        if let (Some(generator), true) = (&self.default_generator, overrides.is_empty()) {
            return Ok(generator.clone());
        }
        let config = Config::resolve(&self.base.merge(overrides))?;
        Ok(VideoGenerator::new(&config)
            .await?
            .with_inflight(self.inflight.clone()))
    }
}

/// `Authorization: Bearer <key>`, a bare `Authorization: <key>`, or `X-API-Key`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    header(AUTHORIZATION)
        .map(|value| value.strip_prefix("Bearer ").map_or(value, str::trim))
        .or_else(|| header(X_API_KEY))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImagePaths {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct ProxyRequest {
    image_path: Option<ImagePaths>,
    prompt: Option<String>,
    second_image: Option<String>,
    aspect_ratio: Option<String>,
    #[serde(default)]
    silent_video: bool,
    sync: Option<bool>,
    #[serde(default)]
    no_auto_reference: bool,
    api_key: Option<String>,
    base_path: Option<PathBuf>,
    save_path: Option<PathBuf>,
    base_url: Option<String>,
}

impl ProxyRequest {
    fn batch(&self) -> Result<BatchRequest, ProxyError> {
        let images: Vec<String> = match &self.image_path {
            Some(ImagePaths::One(path)) => vec![path.clone()],
            Some(ImagePaths::Many(paths)) => paths.clone(),
            None => Vec::new(),
        };
        let images: Vec<String> = images.into_iter().filter(|path| !path.is_empty()).collect();
        if images.is_empty() {
            return Err(ProxyError::BadRequest("Missing required parameter: image_path".into()));
        }

        let prompt = self.prompt.clone().unwrap_or_default();
        if prompt.trim().is_empty() {
            return Err(ProxyError::BadRequest("Missing required parameter: prompt".into()));
        }

        Ok(BatchRequest {
            images,
            second_image: self.second_image.clone().filter(|path| !path.is_empty()),
            prompt,
            aspect_ratio: self
                .aspect_ratio
                .clone()
                .filter(|ratio| !ratio.trim().is_empty())
                .unwrap_or_else(|| "16:9".to_string()),
            prompt_options: PromptOptions {
                auto_reference: !self.no_auto_reference,
                silent: self.silent_video,
            },
            wait: self.sync.unwrap_or(true),
            jobs: 1,
        })
    }

    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_key: self.api_key.clone(),
            base_path: self.base_path.clone(),
            save_path: self.save_path.clone(),
            public_base_url: self.base_url.clone(),
            ..Default::default()
        }
    }
}

async fn generate(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ProxyError> {
    state.authorize(&headers)?;

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ProxyError::BadRequest("Empty request body".into()));
    }
    let request: ProxyRequest = serde_json::from_slice(&body)
        .map_err(|err| ProxyError::BadRequest(format!("Invalid JSON: {err}")))?;
    let batch = request.batch()?;

    let generator = state.generator_for(&request.overrides()).await?;
    tracing::info!(images = batch.images.len(), wait = batch.wait, "generation requested");
    let report = batch::run(&generator, &batch, &state.cancel).await;

    let body = if report.is_success() {
        json!({ "success": true, "data": report })
    } else {
        json!({
            "success": false,
            "error": report.error_messages().join("; "),
            "data": report,
        })
    };
    Ok(Json(body))
}

pub fn router(state: Arc<ProxyState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, X_API_KEY]);

    Router::new()
        .route("/", post(generate))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serves until Ctrl-C, then cancels outstanding polls and drains.
pub async fn serve(listener: TcpListener, state: Arc<ProxyState>) -> std::io::Result<()> {
    let cancel = state.cancel_token();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_on(tokio::signal::ctrl_c(), cancel))
        .await
}

/// Resolves once `signal` fires, cancelling `cancel`. A signal that cannot be
/// installed never resolves, so the server keeps running.
async fn shutdown_on<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        tracing::warn!(error = %err, "Ctrl-C handler unavailable; serving until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("received Ctrl-C, shutting down");
    cancel.cancel();
}

/// Shows only the last four characters of a secret.
pub fn masked(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{visible}", "*".repeat(chars.len() - 4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn keys_are_read_from_either_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(presented_key(&headers), Some("s3cret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("s3cret"));
        assert_eq!(presented_key(&headers), Some("s3cret"));

        let mut headers = HeaderMap::new();
        headers.insert(X_API_KEY, HeaderValue::from_static("other"));
        assert_eq!(presented_key(&headers), Some("other"));

        assert_eq!(presented_key(&HeaderMap::new()), None);
    }

    #[test]
    fn image_path_may_be_a_string_or_a_list() {
        let one: ProxyRequest =
            serde_json::from_str(r#"{"image_path": "a.jpg", "prompt": "p"}"#).unwrap();
        assert_eq!(one.batch().unwrap().images, vec!["a.jpg"]);

        let many: ProxyRequest =
            serde_json::from_str(r#"{"image_path": ["a.jpg", "b.jpg"], "prompt": "p", "sync": false}"#)
                .unwrap();
        let batch = many.batch().unwrap();
        assert_eq!(batch.images, vec!["a.jpg", "b.jpg"]);
        assert!(!batch.wait);
    }

    #[test]
    fn missing_prompt_is_rejected() {
        let request: ProxyRequest = serde_json::from_str(r#"{"image_path": "a.jpg"}"#).unwrap();
        assert!(matches!(request.batch(), Err(ProxyError::BadRequest(_))));
    }

    #[test]
    fn empty_aspect_ratio_falls_back_to_default() {
        let request: ProxyRequest = serde_json::from_str(
            r#"{"image_path": "a.jpg", "prompt": "p", "aspect_ratio": ""}"#,
        )
        .unwrap();
        assert_eq!(request.batch().unwrap().aspect_ratio, "16:9");

        let request: ProxyRequest = serde_json::from_str(
            r#"{"image_path": "a.jpg", "prompt": "p", "aspect_ratio": "9:16"}"#,
        )
        .unwrap();
        assert_eq!(request.batch().unwrap().aspect_ratio, "9:16");
    }

    #[tokio::test]
    async fn shutdown_waits_for_a_working_signal() {
        let cancel = CancellationToken::new();
        shutdown_on(async { Ok(()) }, cancel.clone()).await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn broken_signal_handler_keeps_serving() {
        let cancel = CancellationToken::new();
        let broken = async { Err(std::io::Error::other("no signal handler")) };
        let finished = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            shutdown_on(broken, cancel.clone()),
        )
        .await;
        assert!(finished.is_err());
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn masking_keeps_the_tail() {
        assert_eq!(masked("abcdefgh"), "****efgh");
        assert_eq!(masked("abc"), "***");
    }
}
