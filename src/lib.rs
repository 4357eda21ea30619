//! Image-to-video generation against the Gemini Veo long-running API.
//!
//! This crate submits one or two images plus a prompt, polls the resulting
//! operation until it finishes, downloads the produced video and caches it on
//! disk under a digest of everything that determined it. Asking for the same
//! video twice is answered from disk without contacting the service.
//!
//! ## Features
//! - Async client with a cancellable, fixed-interval poller.
//! - Content-addressed video cache with atomic publishing.
//! - Redirect-aware downloads that keep credentials on the API's origin.
//! - Batch processing with per-item reports.
//! - A CLI (`veogen`) and a local HTTP proxy (`veogen-proxy`) on top of the same library.
//!
//! ## Example
//!
//! ```no_run
//! # use veogen::{Config, ConfigOverrides, VideoGenerator, VideoRequest, PromptOptions};
//! # use tokio_util::sync::CancellationToken;
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config::resolve(&ConfigOverrides::default())?;
//! let generator = VideoGenerator::new(&config).await?;
//! let request = VideoRequest {
//!     image: "catalog/shirt.jpg".into(),
//!     second_image: None,
//!     prompt: "slow zoom in".into(),
//!     aspect_ratio: "16:9".into(),
//!     prompt_options: PromptOptions::default(),
//! };
//! let outcome = generator.generate(&request, true, &CancellationToken::new()).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod generator;
pub mod image;
pub mod poll;
pub mod prompt;
pub mod proxy;
pub mod types;

pub use batch::{BatchRequest, ItemReport, Report};
pub use cache::{CacheKey, CachedVideo, InFlight, VideoCache};
pub use client::{OperationHandle, VeoClient};
pub use config::{Config, ConfigOverrides};
pub use error::VeoError;
pub use generator::{GenerationOutcome, PreparedRequest, VideoGenerator, VideoRequest};
pub use image::{ImageLoader, ImageSource};
pub use poll::{NoProgress, PollObserver, PollOptions, PollProgress};
pub use prompt::PromptOptions;
pub use types::{GenerationRequest, ImagePayload, Operation, OperationState};

/// Installs a stderr `tracing` subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
