mod support;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cachify::cache::{AssetCache, CacheEntry, CacheStatus};
use cachify::coordinator::CompressionCoordinator;
use cachify::error::CompressError;
use support::*;

fn cache_of(entries: &[(&str, &str)]) -> Arc<AssetCache> {
    Arc::new(
        entries
            .iter()
            .map(|(key, body)| (key.to_string(), CacheEntry::new(Bytes::from(body.to_string()))))
            .collect(),
    )
}

#[tokio::test]
async fn test_artifact_is_produced_once_and_memoized() {
    let compressor = CountingCompressor::new();
    let coordinator = CompressionCoordinator::new(Arc::new(compressor.clone()));
    let cache = cache_of(&[("app.js", "X\nY")]);

    let (first, status) = coordinator.artifact(&cache, "app.js").await.unwrap();
    assert_eq!(status, CacheStatus::Miss);
    assert_eq!(first, Bytes::from_static(b"min:X\nY"));

    let (second, status) = coordinator.artifact(&cache, "app.js").await.unwrap();
    assert_eq!(status, CacheStatus::Hit);
    assert_eq!(first, second);
    assert_eq!(compressor.calls(), 1);
    assert_eq!(compressor.names(), vec!["app.js".to_string()]);

    let entry = cache.get("app.js").unwrap();
    assert!(entry.source().is_none());
    assert_eq!(entry.compressed(), Some(first));
}

#[tokio::test]
async fn test_concurrent_requests_share_one_compression() {
    let compressor = CountingCompressor::new().with_delay(Duration::from_millis(50));
    let coordinator = Arc::new(CompressionCoordinator::new(Arc::new(compressor.clone())));
    let cache = cache_of(&[("app.js", "body")]);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let coordinator = Arc::clone(&coordinator);
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            coordinator.artifact(&cache, "app.js").await
        }));
    }
    for handle in handles {
        let (body, status) = handle.await.unwrap().unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(body, Bytes::from_static(b"min:body"));
    }
    assert_eq!(compressor.calls(), 1);
}

#[tokio::test]
async fn test_distinct_keys_compress_independently() {
    let compressor = CountingCompressor::new();
    let coordinator = CompressionCoordinator::new(Arc::new(compressor.clone()));
    let cache = cache_of(&[("a.js", "a"), ("b.css", "b")]);

    let (a, b) = tokio::join!(
        coordinator.artifact(&cache, "a.js"),
        coordinator.artifact(&cache, "b.css")
    );
    assert_eq!(a.unwrap().0, Bytes::from_static(b"min:a"));
    assert_eq!(b.unwrap().0, Bytes::from_static(b"min:b"));
    assert_eq!(compressor.calls(), 2);
}

#[tokio::test]
async fn test_failure_is_shared_then_retried() {
    let compressor = CountingCompressor::new()
        .with_delay(Duration::from_millis(20))
        .failing_first(1);
    let coordinator = CompressionCoordinator::new(Arc::new(compressor.clone()));
    let cache = cache_of(&[("app.js", "body")]);

    let (first, second) = tokio::join!(
        coordinator.artifact(&cache, "app.js"),
        coordinator.artifact(&cache, "app.js")
    );
    assert!(matches!(first, Err(CompressError::Failed { .. })));
    assert!(matches!(second, Err(CompressError::Failed { .. })));
    assert_eq!(compressor.calls(), 1);
    assert!(cache.get("app.js").unwrap().source().is_some());

    let (body, status) = coordinator.artifact(&cache, "app.js").await.unwrap();
    assert_eq!(status, CacheStatus::Miss);
    assert_eq!(body, Bytes::from_static(b"min:body"));
    assert_eq!(compressor.calls(), 2);
}

#[tokio::test]
async fn test_unknown_key_is_rejected() {
    let coordinator = CompressionCoordinator::new(Arc::new(CountingCompressor::new()));
    let cache = cache_of(&[("app.js", "body")]);
    let err = coordinator.artifact(&cache, "nope.js").await.unwrap_err();
    assert!(matches!(err, CompressError::UnknownAsset(key) if key == "nope.js"));
}

#[tokio::test]
async fn test_gzip_round_trips() {
    use std::io::Read;

    use cachify::compress::{Compressor, Gzip};

    let gzip = Gzip::new(6);
    assert_eq!(gzip.content_encoding(), Some("gzip"));
    let packed = gzip
        .compress("app.js", Bytes::from_static(b"console.log(1);\n"))
        .await
        .unwrap();
    let mut out = String::new();
    flate2::read::GzDecoder::new(&packed[..])
        .read_to_string(&mut out)
        .unwrap();
    assert_eq!(out, "console.log(1);\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_compressor_pipes_through_program() {
    use cachify::compress::{Command, Compressor};

    let upper = Command::new(&["tr".to_string(), "a-z".to_string(), "A-Z".to_string()]).unwrap();
    let out = upper.compress("app.js", Bytes::from_static(b"abc")).await.unwrap();
    assert_eq!(out, Bytes::from_static(b"ABC"));

    let failing = Command::new(&["false".to_string()]).unwrap();
    let err = failing.compress("app.js", Bytes::from_static(b"abc")).await.unwrap_err();
    assert!(matches!(err, CompressError::Failed { name, .. } if name == "app.js"));
}
