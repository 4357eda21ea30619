#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use veogen::{
    Config, ConfigOverrides, ImageLoader, PollOptions, VeoClient, VideoCache, VideoGenerator,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const API_KEY: &str = "test_api_key";
pub const MODEL: &str = "veo-3.1-generate-preview";
pub const OPERATION: &str = "models/veo-3.1-generate-preview/operations/op123";
pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42 fake video";

pub fn fast_poll() -> PollOptions {
    PollOptions {
        interval: Duration::from_millis(20),
        max_wait: Duration::from_secs(5),
    }
}

pub fn client(server: &MockServer) -> VeoClient {
    VeoClient::new_with_url(API_KEY.to_string(), &server.uri()).unwrap()
}

/// A store layout rooted in a temp dir: `<root>/pub/media` holds images and
/// `<root>/pub/media/video` receives videos.
pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("pub/media/catalog")).unwrap();
        Self { root }
    }

    pub fn media_dir(&self) -> std::path::PathBuf {
        self.root.path().join("pub/media")
    }

    pub fn write_image(&self, relative: &str, bytes: &[u8]) {
        let path = self.media_dir().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    pub fn overrides(&self, server: &MockServer) -> ConfigOverrides {
        ConfigOverrides {
            api_key: Some(API_KEY.to_string()),
            api_base_url: Some(server.uri()),
            base_path: Some(self.root.path().to_path_buf()),
            public_base_url: Some("https://shop.example".to_string()),
            poll: Some(fast_poll()),
            ..Default::default()
        }
    }

    pub async fn generator(&self, server: &MockServer) -> VideoGenerator {
        let config = Config::resolve(&self.overrides(server)).unwrap();
        VideoGenerator::new(&config).await.unwrap()
    }

    pub async fn cache(&self) -> VideoCache {
        VideoCache::open(
            self.media_dir().join("video"),
            self.root.path(),
            Some("https://shop.example".to_string()),
        )
        .await
        .unwrap()
    }

    pub fn loader(&self, server: &MockServer) -> ImageLoader {
        ImageLoader::new(self.media_dir(), client(server).http())
    }
}

pub fn video_file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_name().to_string_lossy().ends_with(".mp4"))
                .count()
        })
        .unwrap_or(0)
}

pub fn running_operation() -> Value {
    json!({ "name": OPERATION, "done": false })
}

pub fn finished_operation(video_uri: &str) -> Value {
    json!({
        "name": OPERATION,
        "done": true,
        "response": {
            "generateVideoResponse": {
                "generatedSamples": [{ "video": { "uri": video_uri } }]
            }
        }
    })
}

/// Mounts submit, a finished poll and the download for a full sync run.
/// The submit mock must be hit exactly `submits` times.
pub async fn mount_happy_path(server: &MockServer, submits: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/models/{MODEL}:predictLongRunning")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": OPERATION })))
        .expect(submits)
        .mount(server)
        .await;

    let video_uri = format!("{}/files/video1:download?alt=media", server.uri());
    Mock::given(method("GET"))
        .and(path(format!("/{OPERATION}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(finished_operation(&video_uri)))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/video1:download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(VIDEO_BYTES))
        .mount(server)
        .await;
}
