use std::time::Duration;

/// Every failure the generator can surface to a caller.
#[derive(Debug, thiserror::Error)]
pub enum VeoError {
    #[error("API key is required. Use --api-key or set the GEMINI_API_KEY environment variable.")]
    MissingApiKey,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Source image not found: {0}")]
    ImageNotFound(String),
    #[error("Failed to download image from URL {url}: {message}")]
    ImageFetch { url: String, message: String },
    #[error("Network request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("API request failed with status {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("Unexpected API response: {0}")]
    Protocol(String),
    #[error("Invalid operation name: {0}")]
    InvalidOperation(String),
    #[error("Video generation failed: {0}")]
    OperationFailed(String),
    /// The service finished the operation but its content filter withheld the video.
    /// Terminal: resubmitting the same request will be filtered again.
    #[error(
        "Video generation was blocked by safety filters. Reason(s): {}. Filtered count: {count}. \
         Suggestions: 1) Simplify your prompt (remove brand names, celebrities, or copyrighted content), \
         2) If audio is the issue, retry with --silent-video or add 'silent video' to your prompt, \
         3) Check that your image doesn't contain restricted content. \
         You have not been charged for this attempt.",
        .reasons.join(", ")
    )]
    SafetyFiltered { reasons: Vec<String>, count: u32 },
    /// The poll budget ran out. The operation may still finish server side.
    #[error("Video generation timeout after {} seconds (operation {operation})", .waited.as_secs())]
    Timeout { waited: Duration, operation: String },
    #[error("Video generation was cancelled")]
    Cancelled,
    #[error("Video download returned empty content")]
    EmptyDownload,
    #[error("Too many redirects while downloading {0}")]
    TooManyRedirects(String),
    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse API response: {0}")]
    ResponseParseFailed(#[from] serde_json::Error),
    #[error("URL parsing failed: {0}")]
    UrlParseFailed(#[from] url::ParseError),
}
