use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// An image ready to be sent inline with a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// MIME type reported to the service, e.g. `image/png`.
    pub mime_type: String,
}

/// Everything the service needs to start one video generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The finalized prompt, after reference enhancement and silent-video suffixing.
    pub prompt: String,
    /// The first (mandatory) image.
    pub image: ImagePayload,
    /// An optional second image.
    pub second_image: Option<ImagePayload>,
    /// Aspect ratio such as `16:9`. Empty means the service default.
    pub aspect_ratio: String,
}

#[derive(Serialize, Debug)]
pub(crate) struct PredictRequest<'a> {
    pub(crate) instances: Vec<PredictInstance<'a>>,
    pub(crate) parameters: PredictParameters<'a>,
}

#[derive(Serialize, Debug)]
pub(crate) struct PredictInstance<'a> {
    pub(crate) prompt: &'a str,
    pub(crate) image: InlineImage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) image2: Option<InlineImage>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineImage {
    pub(crate) bytes_base64_encoded: String,
    pub(crate) mime_type: String,
}

impl From<&ImagePayload> for InlineImage {
    fn from(image: &ImagePayload) -> Self {
        Self {
            bytes_base64_encoded: STANDARD.encode(&image.bytes),
            mime_type: image.mime_type.clone(),
        }
    }
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PredictParameters<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) aspect_ratio: Option<&'a str>,
}

impl<'a> PredictRequest<'a> {
    pub(crate) fn from_request(request: &'a GenerationRequest) -> Self {
        let aspect_ratio = Some(request.aspect_ratio.as_str()).filter(|ratio| !ratio.is_empty());
        Self {
            instances: vec![PredictInstance {
                prompt: &request.prompt,
                image: InlineImage::from(&request.image),
                image2: request.second_image.as_ref().map(InlineImage::from),
            }],
            parameters: PredictParameters { aspect_ratio },
        }
    }
}

/// The response to a successful submit call.
#[derive(Deserialize, Debug)]
pub(crate) struct SubmitResponse {
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) done: bool,
}

/// A raw long-running operation as returned by the poll endpoint.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Operation {
    /// The operation name, when echoed back.
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the service considers the operation finished.
    #[serde(default)]
    pub done: bool,
    /// The result payload of a finished operation.
    #[serde(default)]
    pub response: Option<OperationResponse>,
    /// The error of a failed operation.
    #[serde(default)]
    pub error: Option<OperationError>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    #[serde(default)]
    pub generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVideoResponse {
    #[serde(default)]
    pub generated_samples: Vec<GeneratedSample>,
    #[serde(default)]
    pub rai_media_filtered_reasons: Option<FilteredReasons>,
    #[serde(default)]
    pub rai_media_filtered_count: Option<u32>,
}

/// Filter reasons arrive as a list, but a bare string has been observed too.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum FilteredReasons {
    Many(Vec<String>),
    One(String),
}

impl FilteredReasons {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            FilteredReasons::Many(reasons) => reasons,
            FilteredReasons::One(reason) => vec![reason],
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct GeneratedSample {
    #[serde(default)]
    pub video: Option<VideoRef>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct VideoRef {
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct OperationError {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Why a finished operation produced no video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The service reported an error on the operation.
    Remote,
    /// The operation finished without a locator or a filter verdict.
    MissingResult,
}

/// The lifecycle state of an operation, derived fresh from every poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Running,
    Succeeded { video_uri: String },
    Filtered { reasons: Vec<String>, count: u32 },
    Failed { kind: FailureKind, message: String },
}

impl Operation {
    /// Classifies this poll response.
    ///
    /// A filter verdict wins over everything else, then a video locator, then a
    /// reported error. A finished operation with none of those is malformed.
    pub fn state(&self) -> OperationState {
        if !self.done {
            return OperationState::Running;
        }

        let generated = self
            .response
            .as_ref()
            .and_then(|response| response.generate_video_response.as_ref());

        if let Some(generated) = generated {
            if let Some(reasons) = generated.rai_media_filtered_reasons.clone() {
                let reasons = reasons.into_vec();
                let count = generated
                    .rai_media_filtered_count
                    .unwrap_or(reasons.len() as u32);
                return OperationState::Filtered { reasons, count };
            }

            let uri = generated
                .generated_samples
                .first()
                .and_then(|sample| sample.video.as_ref())
                .and_then(|video| video.uri.as_deref())
                .filter(|uri| !uri.is_empty());
            if let Some(uri) = uri {
                return OperationState::Succeeded {
                    video_uri: uri.to_string(),
                };
            }
        }

        if let Some(error) = &self.error {
            let message = match (error.code, error.message.as_deref()) {
                (Some(code), Some(message)) => format!("{message} (code {code})"),
                (None, Some(message)) => message.to_string(),
                (Some(code), None) => format!("operation failed with code {code}"),
                (None, None) => "operation failed without details".to_string(),
            };
            return OperationState::Failed {
                kind: FailureKind::Remote,
                message,
            };
        }

        OperationState::Failed {
            kind: FailureKind::MissingResult,
            message: "No video URI found in completed operation response".to_string(),
        }
    }
}

/// (Internal) Google-style error envelope: `{"error": {"code", "message", "status"}}`.
#[derive(Deserialize, Debug)]
pub(crate) struct ApiErrorEnvelope {
    pub(crate) error: ApiErrorBody,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
}
