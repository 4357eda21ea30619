//! Batches of images sharing one prompt, and the JSON reports they produce.

use crate::error::VeoError;
use crate::generator::{GenerationOutcome, VideoGenerator, VideoRequest};
use crate::prompt::PromptOptions;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

const PROCESSING_MESSAGE: &str = "Video generation started. Use --sync option to wait for completion.";

/// One or more primary images that share every other parameter.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub images: Vec<String>,
    pub second_image: Option<String>,
    pub prompt: String,
    pub aspect_ratio: String,
    pub prompt_options: PromptOptions,
    /// Wait for each video to be generated and saved.
    pub wait: bool,
    /// How many items may be in progress at once.
    pub jobs: usize,
}

impl BatchRequest {
    fn item(&self, image: &str) -> VideoRequest {
        VideoRequest {
            image: image.to_string(),
            second_image: self.second_image.clone(),
            prompt: self.prompt.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            prompt_options: self.prompt_options,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemReport {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemReport {
    pub fn from_outcome(
        image_path: &str,
        second_image: Option<&str>,
        outcome: &GenerationOutcome,
    ) -> Self {
        let base = ItemReport {
            image_path: image_path.to_string(),
            success: true,
            second_image_path: second_image.map(str::to_string),
            ..Default::default()
        };

        match outcome {
            GenerationOutcome::Cached(video) => ItemReport {
                status: Some("completed"),
                video_url: Some(video.url.clone()),
                video_path: Some(video.path.display().to_string()),
                cached: Some(true),
                cache_key: Some(video.cache_key.to_string()),
                ..base
            },
            GenerationOutcome::Completed(video) => ItemReport {
                status: Some("completed"),
                video_url: Some(video.url.clone()),
                video_path: Some(video.path.display().to_string()),
                embed_url: Some(video.embed_html()),
                cache_key: Some(video.cache_key.to_string()),
                ..base
            },
            GenerationOutcome::Submitted {
                operation,
                cache_key,
            } => ItemReport {
                status: Some("processing"),
                operation_name: Some(operation.to_string()),
                cache_key: Some(cache_key.to_string()),
                message: Some(PROCESSING_MESSAGE.to_string()),
                ..base
            },
        }
    }

    pub fn failure(image_path: &str, error: &VeoError) -> Self {
        ItemReport {
            image_path: image_path.to_string(),
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub success: bool,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ItemReport>,
    pub errors: Vec<ItemReport>,
    pub generated_at: DateTime<Utc>,
}

/// A single-image run reports the bare item; larger runs report a summary.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Report {
    Single(ItemReport),
    Batch(BatchReport),
}

impl Report {
    pub fn from_items(mut items: Vec<ItemReport>) -> Self {
        if items.len() == 1 {
            return Report::Single(items.remove(0));
        }

        let total = items.len();
        let (results, errors): (Vec<_>, Vec<_>) = items.into_iter().partition(|item| item.success);
        Report::Batch(BatchReport {
            success: errors.is_empty(),
            total,
            succeeded: results.len(),
            failed: errors.len(),
            results,
            errors,
            generated_at: Utc::now(),
        })
    }

    pub fn is_success(&self) -> bool {
        match self {
            Report::Single(item) => item.success,
            Report::Batch(batch) => batch.success,
        }
    }

    /// Error messages of the failed items, each prefixed by its image.
    pub fn error_messages(&self) -> Vec<String> {
        let failed: Vec<&ItemReport> = match self {
            Report::Single(item) if !item.success => vec![item],
            Report::Single(_) => Vec::new(),
            Report::Batch(batch) => batch.errors.iter().collect(),
        };
        failed
            .into_iter()
            .map(|item| {
                format!(
                    "{}: {}",
                    item.image_path,
                    item.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect()
    }
}

/// Runs every item of `batch`. A failing item never stops the others, and
/// items are reported in input order regardless of `jobs`.
pub async fn run(
    generator: &VideoGenerator,
    batch: &BatchRequest,
    cancel: &CancellationToken,
) -> Report {
    let items: Vec<ItemReport> = stream::iter(batch.images.clone())
        .map(|image| run_item(generator, batch, image, cancel))
        .buffered(batch.jobs.max(1))
        .collect()
        .await;

    Report::from_items(items)
}

async fn run_item(
    generator: &VideoGenerator,
    batch: &BatchRequest,
    image: String,
    cancel: &CancellationToken,
) -> ItemReport {
    let request = batch.item(&image);
    let second = batch.second_image.as_deref();
    match generator.generate(&request, batch.wait, cancel).await {
        Ok(outcome) => ItemReport::from_outcome(&image, second, &outcome),
        Err(err) => {
            tracing::error!(image = %image, error = %err, "video generation failed");
            ItemReport::failure(&image, &err)
        }
    }
}
