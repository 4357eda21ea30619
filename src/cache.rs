//! Content-addressed storage for generated videos.
//!
//! The directory listing is the index: a video is cached if and only if
//! `veo_<key>.mp4` exists in the video directory.

use crate::error::VeoError;
use futures_util::stream::{self, Stream, StreamExt};
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const FILE_PREFIX: &str = "veo";
pub const FILE_EXTENSION: &str = "mp4";

/// A deterministic digest of everything that determines a generated video.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for one request.
    ///
    /// Each image is hashed on its own, then
    /// `image:second_image:prompt:aspect_ratio` is hashed again. An absent
    /// second image contributes an empty field, which is distinct from the
    /// digest of an empty image.
    pub fn compute(
        image: &[u8],
        second_image: Option<&[u8]>,
        prompt: &str,
        aspect_ratio: &str,
    ) -> Self {
        let image_hash = md5_hex(image);
        let second_hash = second_image.map(md5_hex).unwrap_or_default();
        let material = format!("{image_hash}:{second_hash}:{prompt}:{aspect_ratio}");
        Self(md5_hex(material.as_bytes()))
    }

    /// Accepts a key from outside, e.g. a CLI flag. Keys become file names, so
    /// only `[A-Za-z0-9_-]` is allowed.
    pub fn parse(key: &str) -> Result<Self, VeoError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(VeoError::InvalidConfig(format!("invalid cache key: {key:?}")));
        }
        Ok(Self(key.to_string()))
    }

    /// Derives a key from a service operation id, replacing anything
    /// [`CacheKey::parse`] would reject with `_`.
    pub fn from_operation_id(id: &str) -> Result<Self, VeoError> {
        let sanitized: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self::parse(&sanitized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The file name a video for this key is stored under.
    pub fn file_name(&self) -> String {
        format!("{FILE_PREFIX}_{}.{FILE_EXTENSION}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// A completed video on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedVideo {
    pub cache_key: CacheKey,
    pub path: PathBuf,
    /// Absolute URL when a public base URL is configured, otherwise root-relative.
    pub url: String,
    /// Whether this lookup was satisfied without contacting the service.
    pub from_cache: bool,
}

impl CachedVideo {
    /// An HTML snippet that plays the video.
    pub fn embed_html(&self) -> String {
        format!(
            r#"<video controls width="100%" height="auto"><source src="{}" type="video/mp4">Your browser does not support the video tag.</video>"#,
            self.url
        )
    }
}

/// The video directory plus what is needed to turn a file into a public URL.
#[derive(Debug, Clone)]
pub struct VideoCache {
    video_dir: PathBuf,
    base_path: PathBuf,
    public_base_url: Option<String>,
}

impl VideoCache {
    /// Opens the cache, creating `video_dir` if needed.
    pub async fn open(
        video_dir: impl Into<PathBuf>,
        base_path: impl Into<PathBuf>,
        public_base_url: Option<String>,
    ) -> Result<Self, VeoError> {
        let video_dir = video_dir.into();
        fs::create_dir_all(&video_dir).await?;
        Ok(Self {
            video_dir,
            base_path: base_path.into(),
            public_base_url: public_base_url.map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    pub fn video_dir(&self) -> &Path {
        &self.video_dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.video_dir.join(key.file_name())
    }

    /// Returns the cached video for `key`, if one has been published.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CachedVideo>, VeoError> {
        let path = self.path_for(key);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        tracing::info!(cache_key = %key, path = %path.display(), "serving video from cache");
        Ok(Some(self.describe(key, path, true)))
    }

    /// Publishes `content` under `key`.
    pub async fn store(&self, key: &CacheKey, content: &[u8]) -> Result<CachedVideo, VeoError> {
        if content.is_empty() {
            return Err(VeoError::EmptyDownload);
        }
        self.store_stream(key, stream::iter([Ok::<_, VeoError>(content)]))
            .await
    }

    /// Publishes a video arriving in chunks under `key`.
    ///
    /// The chunks go to a hidden temporary file in the same directory, which is
    /// synced and then renamed over the final name, so `lookup` never sees a
    /// partial video. A failed, empty or dropped transfer leaves nothing behind.
    pub async fn store_stream<S, B, E>(&self, key: &CacheKey, chunks: S) -> Result<CachedVideo, VeoError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Into<VeoError>,
    {
        let final_path = self.path_for(key);
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{FILE_PREFIX}_{key}."))
            .suffix(".part")
            .tempfile_in(&self.video_dir)?;
        let (file, temp_path) = temp.into_parts();
        let mut file = fs::File::from_std(file);

        let mut chunks = std::pin::pin!(chunks);
        let mut written = 0usize;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(Into::into)?;
            file.write_all(chunk.as_ref()).await?;
            written += chunk.as_ref().len();
        }
        if written == 0 {
            return Err(VeoError::EmptyDownload);
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        temp_path
            .persist(&final_path)
            .map_err(|err| VeoError::IoError(err.error))?;
        tracing::info!(cache_key = %key, path = %final_path.display(), bytes = written, "video saved");

        Ok(self.describe(key, final_path, false))
    }

    fn describe(&self, key: &CacheKey, path: PathBuf, from_cache: bool) -> CachedVideo {
        CachedVideo {
            cache_key: key.clone(),
            url: self.public_url(&path),
            path,
            from_cache,
        }
    }

    /// `{base_url}/{path relative to base_path}`, or `/{relative}` without a base URL.
    /// Files outside `base_path` fall back to their bare file name.
    pub fn public_url(&self, path: &Path) -> String {
        let relative = match path.strip_prefix(&self.base_path) {
            Ok(relative) => relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        match &self.public_base_url {
            Some(base) => format!("{base}/{relative}"),
            None => format!("/{relative}"),
        }
    }
}

/// Per-key locks for generations that are currently being waited on.
///
/// Entries are weak, so a key's slot disappears once no generation holds it.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    slots: Arc<Mutex<HashMap<CacheKey, Weak<tokio::sync::Mutex<()>>>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock shared by every generation of `key`.
    pub fn slot(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| slot.strong_count() > 0);

        if let Some(slot) = slots.get(key).and_then(Weak::upgrade) {
            return slot;
        }
        let slot = Arc::new(tokio::sync::Mutex::new(()));
        slots.insert(key.clone(), Arc::downgrade(&slot));
        slot
    }

    /// Number of keys that currently have a live lock.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|slot| slot.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_path_tricks() {
        assert!(CacheKey::parse("abc-123_DEF").is_ok());
        assert!(CacheKey::parse("../etc").is_err());
        assert!(CacheKey::parse("a/b").is_err());
        assert!(CacheKey::parse("").is_err());
    }

    #[test]
    fn operation_ids_become_file_safe_keys() {
        assert_eq!(CacheKey::from_operation_id("op.1~x").unwrap().as_str(), "op_1_x");
        assert_eq!(CacheKey::from_operation_id("abc-123").unwrap().as_str(), "abc-123");
        assert!(CacheKey::from_operation_id("").is_err());
    }

    #[test]
    fn inflight_shares_a_slot_per_key() {
        let inflight = InFlight::new();
        let key = CacheKey::parse("k").unwrap();

        let first = inflight.slot(&key);
        let second = inflight.slot(&key);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(inflight.len(), 1);

        drop(first);
        drop(second);
        assert!(inflight.is_empty());
    }
}
