mod common;

use common::{video_file_count, Workspace};
use futures_util::stream;
use veogen::{CacheKey, VeoError, VideoCache};

#[tokio::test]
async fn lookup_misses_until_a_video_is_stored() {
    let workspace = Workspace::new();
    let cache = workspace.cache().await;
    let key = CacheKey::compute(b"img", None, "pan left", "16:9");

    assert!(cache.lookup(&key).await.unwrap().is_none());

    let stored = cache.store(&key, b"video bytes").await.unwrap();
    assert!(!stored.from_cache);
    assert_eq!(stored.path, cache.video_dir().join(key.file_name()));
    assert_eq!(
        stored.url,
        format!("https://shop.example/pub/media/video/{}", key.file_name())
    );
    assert_eq!(std::fs::read(&stored.path).unwrap(), b"video bytes");

    let found = cache.lookup(&key).await.unwrap().unwrap();
    assert!(found.from_cache);
    assert_eq!(found.path, stored.path);
    assert_eq!(found.url, stored.url);
}

#[tokio::test]
async fn store_leaves_no_temporary_files() {
    let workspace = Workspace::new();
    let cache = workspace.cache().await;
    let key = CacheKey::parse("resumed-op").unwrap();

    cache.store(&key, b"first").await.unwrap();
    cache.store(&key, b"second").await.unwrap();

    let names: Vec<String> = std::fs::read_dir(cache.video_dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["veo_resumed-op.mp4".to_string()]);
    assert_eq!(std::fs::read(cache.path_for(&key)).unwrap(), b"second");
}

#[tokio::test]
async fn empty_content_is_never_published() {
    let workspace = Workspace::new();
    let cache = workspace.cache().await;
    let key = CacheKey::parse("empty").unwrap();

    let err = cache.store(&key, b"").await.unwrap_err();
    assert!(matches!(err, VeoError::EmptyDownload));
    assert!(cache.lookup(&key).await.unwrap().is_none());
    assert_eq!(video_file_count(cache.video_dir()), 0);
}

#[tokio::test]
async fn urls_are_root_relative_without_a_base_url() {
    let workspace = Workspace::new();
    let cache = VideoCache::open(workspace.media_dir().join("video"), workspace.root.path(), None)
        .await
        .unwrap();
    let key = CacheKey::parse("abc").unwrap();

    let stored = cache.store(&key, b"x").await.unwrap();
    assert_eq!(stored.url, "/pub/media/video/veo_abc.mp4");
    assert!(stored.embed_html().contains(r#"src="/pub/media/video/veo_abc.mp4""#));
}

#[tokio::test]
async fn videos_outside_the_base_path_use_their_file_name() {
    let workspace = Workspace::new();
    let elsewhere = tempfile::TempDir::new().unwrap();
    let cache = VideoCache::open(
        elsewhere.path().join("clips"),
        workspace.root.path(),
        Some("https://shop.example".to_string()),
    )
    .await
    .unwrap();
    let key = CacheKey::parse("abc").unwrap();

    let stored = cache.store(&key, b"x").await.unwrap();
    assert_eq!(stored.url, "https://shop.example/veo_abc.mp4");

    let relative = VideoCache::open(elsewhere.path().join("clips"), workspace.root.path(), None)
        .await
        .unwrap();
    assert_eq!(relative.public_url(&stored.path), "/veo_abc.mp4");
}

#[tokio::test]
async fn chunked_videos_are_joined_in_order() {
    let workspace = Workspace::new();
    let cache = workspace.cache().await;
    let key = CacheKey::parse("chunked").unwrap();

    let chunks = stream::iter(vec![
        Ok::<_, VeoError>(b"first ".to_vec()),
        Ok(Vec::new()),
        Ok(b"second".to_vec()),
    ]);
    let stored = cache.store_stream(&key, chunks).await.unwrap();
    assert_eq!(std::fs::read(&stored.path).unwrap(), b"first second");
}

#[tokio::test]
async fn interrupted_transfers_publish_nothing() {
    let workspace = Workspace::new();
    let cache = workspace.cache().await;
    let key = CacheKey::parse("broken").unwrap();

    let chunks = stream::iter(vec![
        Ok(b"partial".to_vec()),
        Err(VeoError::Protocol("connection reset".into())),
    ]);
    let err = cache.store_stream(&key, chunks).await.unwrap_err();
    assert!(matches!(err, VeoError::Protocol(_)), "{err:?}");
    assert!(cache.lookup(&key).await.unwrap().is_none());
    assert_eq!(std::fs::read_dir(cache.video_dir()).unwrap().count(), 0);

    let empty = stream::iter(Vec::<Result<Vec<u8>, VeoError>>::new());
    let err = cache.store_stream(&key, empty).await.unwrap_err();
    assert!(matches!(err, VeoError::EmptyDownload), "{err:?}");
    assert_eq!(std::fs::read_dir(cache.video_dir()).unwrap().count(), 0);
}
