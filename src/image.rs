use crate::error::VeoError;
use crate::types::ImagePayload;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const FALLBACK_MIME: &str = "image/jpeg";
const MEDIA_PREFIX: &str = "pub/media/";

/// Where an input image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(Url),
    File(PathBuf),
}

impl ImageSource {
    /// Interprets a CLI or API argument.
    ///
    /// `http://` and `https://` inputs are URLs. Absolute paths are used as is.
    /// Relative paths are resolved against `media_dir`, after dropping a
    /// redundant leading `pub/media/`.
    pub fn parse(input: &str, media_dir: &Path) -> Result<Self, VeoError> {
        if is_url(input) {
            return Ok(ImageSource::Url(Url::parse(input)?));
        }

        let path = Path::new(input);
        if path.is_absolute() {
            return Ok(ImageSource::File(path.to_path_buf()));
        }

        let relative = input.strip_prefix(MEDIA_PREFIX).unwrap_or(input);
        Ok(ImageSource::File(media_dir.join(relative.trim_start_matches('/'))))
    }

    /// A short human-readable name used when referring to the image in a prompt.
    pub fn reference_name(&self) -> String {
        match self {
            ImageSource::Url(url) => Path::new(url.path())
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .filter(|stem| !stem.is_empty())
                .unwrap_or_else(|| "image".to_string()),
            ImageSource::File(path) => path
                .file_stem()
                .or_else(|| path.file_name())
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// An image that has been read or fetched.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub source: ImageSource,
    pub payload: ImagePayload,
}

/// Reads images from the media directory or fetches them over HTTP.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    media_dir: PathBuf,
    http: reqwest::Client,
}

impl ImageLoader {
    pub fn new(media_dir: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            media_dir: media_dir.into(),
            http,
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Loads `input`, which may be a URL or a path.
    ///
    /// # Errors
    ///
    /// - `VeoError::ImageNotFound` when a local file does not exist.
    /// - `VeoError::ImageFetch` when a URL cannot be retrieved.
    pub async fn load(&self, input: &str) -> Result<LoadedImage, VeoError> {
        let source = ImageSource::parse(input, &self.media_dir)?;
        let payload = match &source {
            ImageSource::Url(url) => self.fetch(url).await?,
            ImageSource::File(path) => read_file(input, path).await?,
        };
        tracing::debug!(
            input,
            bytes = payload.bytes.len(),
            mime = %payload.mime_type,
            "loaded image"
        );
        Ok(LoadedImage { source, payload })
    }

    async fn fetch(&self, url: &Url) -> Result<ImagePayload, VeoError> {
        let fetch_error = |message: String| VeoError::ImageFetch {
            url: url.to_string(),
            message,
        };

        let response = self
            .http
            .get(url.clone())
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|err| fetch_error(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("status {status}")));
        }

        let header_mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_string())
            .filter(|mime| !mime.is_empty() && mime != "application/octet-stream");
        let mime_type = header_mime.unwrap_or_else(|| guess_mime(Path::new(url.path())));

        let bytes = response
            .bytes()
            .await
            .map_err(|err| fetch_error(err.to_string()))?;
        Ok(ImagePayload {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}

async fn read_file(input: &str, path: &Path) -> Result<ImagePayload, VeoError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(VeoError::ImageNotFound(input.to_string()));
        }
        Err(err) => return Err(err.into()),
    };
    Ok(ImagePayload {
        bytes,
        mime_type: guess_mime(path),
    })
}

fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}
