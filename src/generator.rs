//! Request orchestration: image loading, prompt finalization, cache lookup,
//! submission, polling and publishing the downloaded video.

use crate::cache::{CacheKey, CachedVideo, InFlight, VideoCache};
use crate::client::{OperationHandle, VeoClient};
use crate::config::Config;
use crate::error::VeoError;
use crate::image::ImageLoader;
use crate::poll::{NoProgress, PollObserver, PollOptions};
use crate::prompt::{self, PromptOptions};
use crate::types::GenerationRequest;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A user-level request: image sources rather than image bytes.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    /// Path or URL of the first image.
    pub image: String,
    /// Path or URL of an optional second image.
    pub second_image: Option<String>,
    pub prompt: String,
    pub aspect_ratio: String,
    pub prompt_options: PromptOptions,
}

/// A request whose images are loaded and whose prompt is final.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub cache_key: CacheKey,
    pub request: GenerationRequest,
}

/// What [`VideoGenerator::generate`] produced.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// A video for this request already existed. No remote call was made.
    Cached(CachedVideo),
    /// The video was generated, downloaded and saved.
    Completed(CachedVideo),
    /// The request was submitted without waiting; resume it with
    /// [`VideoGenerator::finish_operation`].
    Submitted {
        operation: OperationHandle,
        cache_key: CacheKey,
    },
}

#[derive(Clone)]
pub struct VideoGenerator {
    client: VeoClient,
    cache: VideoCache,
    images: ImageLoader,
    poll: PollOptions,
    inflight: InFlight,
    observer: Arc<dyn PollObserver>,
}

impl VideoGenerator {
    /// Builds a generator from resolved configuration, creating the video
    /// directory if needed.
    pub async fn new(config: &Config) -> Result<Self, VeoError> {
        let client = VeoClient::from_config(config)?;
        let cache = VideoCache::open(
            &config.video_dir,
            &config.base_path,
            config.public_base_url.clone(),
        )
        .await?;
        let images = ImageLoader::new(&config.media_dir, client.http());
        Ok(Self::from_parts(client, cache, images, config.poll))
    }

    pub fn from_parts(
        client: VeoClient,
        cache: VideoCache,
        images: ImageLoader,
        poll: PollOptions,
    ) -> Self {
        Self {
            client,
            cache,
            images,
            poll,
            inflight: InFlight::new(),
            observer: Arc::new(NoProgress),
        }
    }

    /// Shares in-flight de-duplication with other generators.
    pub fn with_inflight(mut self, inflight: InFlight) -> Self {
        self.inflight = inflight;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PollObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn client(&self) -> &VeoClient {
        &self.client
    }

    pub fn cache(&self) -> &VideoCache {
        &self.cache
    }

    /// Loads both images, finalizes the prompt and derives the cache key.
    pub async fn prepare(&self, request: &VideoRequest) -> Result<PreparedRequest, VeoError> {
        let first = self.images.load(&request.image).await?;
        let second = match &request.second_image {
            Some(input) => Some(self.images.load(input).await?),
            None => None,
        };

        let second_name = second.as_ref().map(|image| image.source.reference_name());
        let final_prompt = prompt::finalize(
            &request.prompt,
            &first.source.reference_name(),
            second_name.as_deref(),
            request.prompt_options,
        );
        if final_prompt != request.prompt {
            tracing::debug!(original = %request.prompt, final_prompt = %final_prompt, "prompt finalized");
        }

        let cache_key = CacheKey::compute(
            &first.payload.bytes,
            second.as_ref().map(|image| image.payload.bytes.as_slice()),
            &final_prompt,
            &request.aspect_ratio,
        );

        Ok(PreparedRequest {
            cache_key,
            request: GenerationRequest {
                prompt: final_prompt,
                image: first.payload,
                second_image: second.map(|image| image.payload),
                aspect_ratio: request.aspect_ratio.clone(),
            },
        })
    }

    /// Produces a video for `request`, reusing a cached one when possible.
    ///
    /// With `wait` set, the call polls until the video is saved. Concurrent
    /// waiting calls for the same cache key submit once; the others pick the
    /// result up from the cache. Without `wait`, the operation is submitted and
    /// its handle returned immediately.
    pub async fn generate(
        &self,
        request: &VideoRequest,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, VeoError> {
        let prepared = self.prepare(request).await?;
        let key = prepared.cache_key.clone();

        if let Some(cached) = self.cache.lookup(&key).await? {
            return Ok(GenerationOutcome::Cached(cached));
        }

        if !wait {
            let operation = self.client.submit(&prepared.request).await?;
            return Ok(GenerationOutcome::Submitted {
                operation,
                cache_key: key,
            });
        }

        let slot = self.inflight.slot(&key);
        let _guard = tokio::select! {
            _ = cancel.cancelled() => return Err(VeoError::Cancelled),
            guard = slot.lock() => guard,
        };

        // Another request may have produced this video while we queued.
        if let Some(cached) = self.cache.lookup(&key).await? {
            return Ok(GenerationOutcome::Cached(cached));
        }

        let operation = self.client.submit(&prepared.request).await?;
        let video = self.finish_operation(&operation, Some(key), cancel).await?;
        Ok(GenerationOutcome::Completed(video))
    }

    /// Waits for a submitted operation and saves its video.
    ///
    /// Without an explicit `cache_key` the operation id names the file.
    pub async fn finish_operation(
        &self,
        operation: &OperationHandle,
        cache_key: Option<CacheKey>,
        cancel: &CancellationToken,
    ) -> Result<CachedVideo, VeoError> {
        let key = match cache_key {
            Some(key) => key,
            None => CacheKey::from_operation_id(operation.id())?,
        };

        let video_uri = self
            .client
            .wait_for_operation(operation, &self.poll, cancel, self.observer.as_ref())
            .await?;

        tokio::select! {
            _ = cancel.cancelled() => Err(VeoError::Cancelled),
            video = self.download_into_cache(&video_uri, &key) => video,
        }
    }

    async fn download_into_cache(&self, video_uri: &str, key: &CacheKey) -> Result<CachedVideo, VeoError> {
        let response = self.client.open_download(video_uri).await?;
        self.cache.store_stream(key, response.bytes_stream()).await
    }
}
