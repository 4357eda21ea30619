use crate::config::Config;
use crate::error::VeoError;
use crate::types::{ApiErrorEnvelope, GenerationRequest, Operation, PredictRequest, SubmitResponse};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{redirect, Response};
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";
pub const DEFAULT_MODEL: &str = "veo-3.1-generate-preview";

const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-goog-api-key");
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_REDIRECTS: usize = 10;

static OPERATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._~\-]*(/[A-Za-z0-9._~\-]+)*$").unwrap());

/// The opaque name of a server-side operation, e.g. `models/veo/operations/abc123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle(String);

impl OperationHandle {
    /// Validates a name received from the service or supplied by a user.
    ///
    /// The name is spliced into the poll URL, so only path-safe characters are
    /// accepted and `.`/`..` segments are rejected.
    pub fn parse(name: &str) -> Result<Self, VeoError> {
        let name = name.trim();
        let dotted = name.split('/').any(|segment| segment == "." || segment == "..");
        if dotted || !OPERATION_RE.is_match(name) {
            return Err(VeoError::InvalidOperation(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path segment, which the service uses as the operation id.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The client for the long-running video generation API.
///
/// It holds one `reqwest::Client` that authenticates every API call, one with
/// no credentials and no automatic redirects for video downloads, where
/// credentials must only reach the API's own origin, and a plain one for
/// everything else. Cloning is cheap.
#[derive(Clone)]
pub struct VeoClient {
    client: reqwest::Client,
    downloads: reqwest::Client,
    plain: reqwest::Client,
    base_url: Url,
    model: String,
    api_key: String,
}

impl VeoClient {
    /// Creates a client against a custom base URL, such as a mock server.
    pub fn new_with_url(api_key: String, base_url: &str) -> Result<Self, VeoError> {
        if api_key.is_empty() {
            return Err(VeoError::MissingApiKey);
        }

        let mut key_value = HeaderValue::from_str(&api_key).map_err(|_| {
            VeoError::InvalidConfig("API key contains characters not allowed in a header".into())
        })?;
        key_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        let downloads = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;
        let plain = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            downloads,
            plain,
            base_url: normalize_base_url(base_url)?,
            model: DEFAULT_MODEL.to_string(),
            api_key,
        })
    }

    /// Creates a client from resolved configuration.
    pub fn from_config(config: &Config) -> Result<Self, VeoError> {
        Ok(Self::new_with_url(config.api_key.clone(), config.api_base_url.as_str())?
            .with_model(config.model.clone()))
    }

    /// Targets a different model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// A plain HTTP client that carries no API credentials.
    pub fn http(&self) -> reqwest::Client {
        self.plain.clone()
    }

    /// Submits a generation request and returns the handle of the new operation.
    pub async fn submit(&self, request: &GenerationRequest) -> Result<OperationHandle, VeoError> {
        let url = self
            .base_url
            .join(&format!("models/{}:predictLongRunning", self.model))?;
        let body = PredictRequest::from_request(request);

        tracing::debug!(
            endpoint = %url,
            model = %self.model,
            prompt = %request.prompt,
            image_bytes = request.image.bytes.len(),
            image_mime = %request.image.mime_type,
            second_image_bytes = request.second_image.as_ref().map(|image| image.bytes.len()),
            aspect_ratio = %request.aspect_ratio,
            "submitting video generation request"
        );

        let response = self
            .client
            .post(url)
            .timeout(SUBMIT_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let text = success_body(response).await?;
        tracing::debug!(body = %text, "submit response");

        let submitted: SubmitResponse = serde_json::from_str(&text)?;
        let name = submitted
            .name
            .ok_or_else(|| VeoError::Protocol("operation name not found in submit response".into()))?;
        let handle = OperationHandle::parse(&name)?;
        tracing::info!(operation = %handle, done = submitted.done, "video generation submitted");
        Ok(handle)
    }

    /// Fetches the current state of an operation once.
    pub async fn get_operation(
        &self,
        handle: &OperationHandle,
        timeout: Duration,
    ) -> Result<Operation, VeoError> {
        let url = self.base_url.join(handle.as_str())?;
        let response = self.client.get(url).timeout(timeout).send().await?;
        let text = success_body(response).await?;
        tracing::trace!(operation = %handle, body = %text, "poll response");
        Ok(serde_json::from_str(&text)?)
    }

    /// Downloads a finished video into memory. See [`VeoClient::open_download`].
    ///
    /// # Errors
    ///
    /// - `VeoError::EmptyDownload` if the body is empty.
    /// - Anything `open_download` returns.
    pub async fn download_video(&self, video_uri: &str) -> Result<Vec<u8>, VeoError> {
        let content = self.open_download(video_uri).await?.bytes().await?;
        if content.is_empty() {
            return Err(VeoError::EmptyDownload);
        }
        tracing::debug!(bytes = content.len(), "video downloaded");
        Ok(content.to_vec())
    }

    /// Resolves a video locator to a successful response whose body has not
    /// been read yet, following redirects by hand.
    ///
    /// Hops to the API's own origin carry the API key as a header and as a
    /// `key` query parameter; hops anywhere else carry no credentials.
    ///
    /// # Errors
    ///
    /// - `VeoError::ApiError` if the final response is not a success.
    /// - `VeoError::TooManyRedirects` after more than ten hops.
    pub async fn open_download(&self, video_uri: &str) -> Result<Response, VeoError> {
        let mut url = Url::parse(video_uri)?;
        let mut hops = 0;

        let response = loop {
            let request = if self.is_trusted(&url) {
                self.downloads
                    .get(with_key_param(url.clone(), &self.api_key))
                    .header(API_KEY_HEADER, self.api_key.as_str())
            } else {
                self.downloads.get(url.clone())
            };
            let response = request.timeout(DOWNLOAD_TIMEOUT).send().await?;

            if !response.status().is_redirection() {
                break response;
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| VeoError::Protocol("redirect without a Location header".into()))?;
            url = url.join(location)?;
            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(VeoError::TooManyRedirects(video_uri.to_string()));
            }
        };

        if hops > 0 {
            tracing::info!(redirects = hops, final_host = ?url.host_str(), "followed download redirects");
        }

        let status = response.status();
        if !status.is_success() {
            return Err(VeoError::ApiError {
                status: status.as_u16(),
                message: format!("Failed to download video: status {status}"),
            });
        }
        Ok(response)
    }

    fn is_trusted(&self, url: &Url) -> bool {
        url.origin() == self.base_url.origin()
    }
}

fn normalize_base_url(base_url: &str) -> Result<Url, VeoError> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn with_key_param(mut url: Url, api_key: &str) -> Url {
    if !url.query_pairs().any(|(name, _)| name == "key") {
        url.query_pairs_mut().append_pair("key", api_key);
    }
    url
}

/// Returns the body of a successful response, or maps the failure to `ApiError`.
async fn success_body(response: Response) -> Result<String, VeoError> {
    let status = response.status();
    let text = response.text().await?;
    if status.is_success() {
        return Ok(text);
    }

    let message = match serde_json::from_str::<ApiErrorEnvelope>(&text) {
        Ok(envelope) => match (envelope.error.status, envelope.error.message) {
            (Some(kind), Some(message)) => format!("{kind}: {message}"),
            (_, Some(message)) => message,
            _ => text,
        },
        Err(_) if text.is_empty() => status.to_string(),
        Err(_) => text,
    };
    tracing::warn!(status = status.as_u16(), %message, "API request failed");
    Err(VeoError::ApiError {
        status: status.as_u16(),
        message,
    })
}
