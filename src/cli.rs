//! The `veogen` command line.

use crate::batch::{self, BatchRequest, ItemReport, Report};
use crate::cache::CacheKey;
use crate::client::OperationHandle;
use crate::config::{Config, ConfigOverrides};
use crate::error::VeoError;
use crate::generator::{GenerationOutcome, VideoGenerator};
use crate::poll::{NoProgress, PollObserver, PollOptions, PollProgress};
use crate::prompt::PromptOptions;
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ENV_HELP: &str = "\
Environment variables (from a .env file or the process environment):
    GEMINI_API_KEY       API key for the video generation service
    VIDEO_BASE_PATH      Base path that public video URLs are relative to (MAGENTO_BASE_PATH also accepted)
    VIDEO_SAVE_PATH      Where videos are saved, relative to the base path or absolute
    VIDEO_BASE_URL       Base URL for public video URLs (MAGENTO_BASE_URL and BASE_URL also accepted)
    GOOGLE_API_DOMAIN    Override the API endpoint
    VEO_MODEL            Override the model

Command line arguments override environment variables.";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "veogen",
    version,
    about = "Generate videos from images with the Gemini Veo API",
    after_help = ENV_HELP
)]
pub struct Cli {
    /// Source image path(s) or URL(s): relative to pub/media/, absolute, or http(s).
    #[arg(
        short = 'i',
        long = "image-path",
        value_name = "PATH_OR_URL",
        num_args = 1..,
        required_unless_present = "resume"
    )]
    pub image_path: Vec<String>,

    /// Optional second image sent alongside each source image.
    #[arg(short = 's', long, value_name = "PATH_OR_URL")]
    pub second_image: Option<String>,

    /// Generation prompt. With a second image, refer to them as "image1"/"image2",
    /// "first image"/"second image", or by file name.
    #[arg(short, long, required_unless_present = "resume")]
    pub prompt: Option<String>,

    /// Do not prefix the prompt with a sentence naming both images.
    #[arg(long)]
    pub no_auto_reference: bool,

    /// Aspect ratio, e.g. 16:9, 9:16 or 1:1.
    #[arg(short, long, default_value = "16:9")]
    pub aspect_ratio: String,

    /// Ask for a video without audio (helps with audio-related safety filters).
    #[arg(long)]
    pub silent_video: bool,

    /// Wait for the video to be generated and saved.
    #[arg(long)]
    pub sync: bool,

    /// API key (overrides GEMINI_API_KEY).
    #[arg(long)]
    pub api_key: Option<String>,

    /// API endpoint (overrides GOOGLE_API_DOMAIN).
    #[arg(long, value_name = "URL")]
    pub api_base_url: Option<String>,

    /// Base path (overrides VIDEO_BASE_PATH).
    #[arg(long)]
    pub base_path: Option<PathBuf>,

    /// Video directory, relative to the base path or absolute (overrides VIDEO_SAVE_PATH).
    #[arg(long)]
    pub save_path: Option<PathBuf>,

    /// Base URL for public video URLs (overrides VIDEO_BASE_URL).
    #[arg(long)]
    pub base_url: Option<String>,

    /// Load variables from this .env file.
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Give up waiting after this many seconds.
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub max_wait: u64,

    /// Seconds between status polls.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub poll_interval: u64,

    /// Number of images processed at once.
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Wait for a previously submitted operation instead of starting a new one.
    #[arg(long, value_name = "OPERATION", conflicts_with = "image_path")]
    pub resume: Option<String>,

    /// Cache key to save a resumed operation under (defaults to the operation id).
    #[arg(long, requires = "resume")]
    pub cache_key: Option<String>,

    /// Log request, response and prompt details to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_key: self.api_key.clone(),
            api_base_url: self.api_base_url.clone(),
            base_path: self.base_path.clone(),
            save_path: self.save_path.clone(),
            public_base_url: self.base_url.clone(),
            poll: Some(PollOptions {
                interval: Duration::from_secs(self.poll_interval),
                max_wait: Duration::from_secs(self.max_wait),
            }),
            ..Default::default()
        }
    }

    pub fn batch_request(&self) -> BatchRequest {
        BatchRequest {
            images: self.image_path.clone(),
            second_image: self.second_image.clone(),
            prompt: self.prompt.clone().unwrap_or_default(),
            aspect_ratio: self.aspect_ratio.clone(),
            prompt_options: PromptOptions {
                auto_reference: !self.no_auto_reference,
                silent: self.silent_video,
            },
            wait: self.sync,
            jobs: self.jobs,
        }
    }
}

/// Parses arguments, runs the command and prints its JSON report.
/// Returns the process exit code.
pub async fn run() -> i32 {
    dotenvy::dotenv().ok();
    run_with(Cli::parse()).await
}

pub async fn run_with(cli: Cli) -> i32 {
    if let Some(path) = &cli.env_file {
        if let Err(err) = dotenvy::from_path(path) {
            print_failure(&format!("Failed to load env file {}: {err}", path.display()));
            return 1;
        }
    }

    crate::init_tracing(if cli.verbose { "veogen=debug" } else { "veogen=warn" });

    let config = match Config::resolve(&cli.overrides()) {
        Ok(config) => config,
        Err(err) => {
            print_failure(&err.to_string());
            return 1;
        }
    };

    let observer: Arc<dyn PollObserver> =
        if !cli.verbose && cli.jobs <= 1 && io::stderr().is_terminal() {
            Arc::new(Spinner::default())
        } else {
            Arc::new(NoProgress)
        };
    let generator = match VideoGenerator::new(&config).await {
        Ok(generator) => generator.with_observer(observer),
        Err(err) => {
            print_failure(&err.to_string());
            return 1;
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let report = match &cli.resume {
        Some(operation) => resume(&generator, operation, cli.cache_key.as_deref(), &cancel).await,
        None => batch::run(&generator, &cli.batch_request(), &cancel).await,
    };

    print_json(&report);
    if report.is_success() {
        0
    } else {
        1
    }
}

async fn resume(
    generator: &VideoGenerator,
    operation: &str,
    cache_key: Option<&str>,
    cancel: &CancellationToken,
) -> Report {
    let finished = async {
        let handle = OperationHandle::parse(operation)?;
        let key = cache_key.map(CacheKey::parse).transpose()?;
        generator.finish_operation(&handle, key, cancel).await
    };

    let mut item = match finished.await {
        Ok(video) => ItemReport::from_outcome("", None, &GenerationOutcome::Completed(video)),
        Err(err) => ItemReport::failure("", &err),
    };
    item.operation_name = Some(operation.to_string());
    Report::Single(item)
}

fn print_failure(message: &str) {
    print_json(&json!({ "success": false, "error": message }));
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => println!(r#"{{"success": false, "error": "{}"}}"#, VeoError::from(err)),
    }
}

const SPINNER_FRAMES: [&str; 7] = [
    "🎬 Generating video",
    "🎥 Creating magic",
    "✨ Crafting frames",
    "🎞️  Processing scenes",
    "🎭 Building story",
    "🎨 Adding effects",
    "🌟 Finalizing",
];

/// Redraws a one-line status on stderr after each poll.
#[derive(Debug, Default)]
struct Spinner {
    frame: AtomicUsize,
}

impl PollObserver for Spinner {
    fn on_poll(&self, progress: &PollProgress<'_>) {
        let frame = self.frame.fetch_add(1, Ordering::Relaxed) % SPINNER_FRAMES.len();
        let mut stderr = io::stderr().lock();
        let _ = write!(
            stderr,
            "\r{} ({}s)   ",
            SPINNER_FRAMES[frame],
            progress.elapsed.as_secs()
        );
        let _ = stderr.flush();
    }

    fn on_complete(&self, succeeded: bool) {
        let mut stderr = io::stderr().lock();
        if succeeded {
            let _ = writeln!(stderr, "\r✅ Video generation complete!{:20}", "");
        } else {
            let _ = writeln!(stderr);
        }
    }
}
