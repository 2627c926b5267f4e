mod support;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use cachify::config::{AssetsConfig, Bootstrap, Server};
use cachify::hasher::fingerprint;
use http::{Method, StatusCode};
use support::*;
use tokio::sync::OnceCell;

const ADDR: &str = "127.0.0.1:18181";

static ROOT: OnceLock<AssetDir> = OnceLock::new();
static START: OnceCell<()> = OnceCell::const_new();

/// Receives nothing but readiness probes.
const PROBE_ONLY_ADDR: &str = "127.0.0.1:18182";

fn root() -> &'static AssetDir {
    ROOT.get_or_init(|| {
        AssetDir::new(&[
            ("js/a.js", "X"),
            ("js/b.js", "Y"),
            ("index.html", "<script src=\"/s/app.js\"></script>"),
        ])
    })
}

fn assets_config() -> AssetsConfig {
    root()
        .config()
        .prefix("/s/")
        .asset("app.js", vec!["/js/a.js", "/js/b.js"])
}

/// Boots a server on its own runtime thread. It keeps running until the test
/// binary exits.
async fn spawn_server(addr: &str) {
    let cfg = Bootstrap {
        server: Server {
            addr: addr.to_string(),
            ..Default::default()
        },
        assets: assets_config(),
        ..Default::default()
    };
    let cachify = cachify_with(&cfg.assets, &CountingCompressor::new());
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let _ = cachify::server::serve(Arc::new(cfg), cachify).await;
        });
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
}

async fn ensure_server() -> TestClient {
    START.get_or_init(|| spawn_server(ADDR)).await;
    TestClient::new(ADDR)
}

#[tokio::test]
async fn test_serves_hashed_asset() {
    let client = ensure_server().await;
    let path = format!("/s/{}app.js", fingerprint(b"X\nY"));

    let resp = client.get(&path).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body.as_ref(), b"min:X\nY");
    assert_eq!(resp.header("Cache-Control"), Some("public, max-age=31536000"));
    assert!(matches!(resp.header("X-Cachify-Status"), Some("MISS") | Some("HIT")));
    assert!(resp.header("X-Request-ID").is_some());
}

#[tokio::test]
async fn test_redirects_stale_hash() {
    let client = ensure_server().await;
    let resp = client.get("/s/deadbeef00app.js").await;
    assert_eq!(resp.status, StatusCode::FOUND);
    assert_eq!(resp.header("Location"), Some("/app.js"));
}

#[tokio::test]
async fn test_falls_through_to_static_files() {
    let client = ensure_server().await;

    let page = client.get("/index.html").await;
    assert_eq!(page.status, StatusCode::OK);
    assert_eq!(page.header("X-Cachify-Status"), Some("PASS"));
    assert!(page.header("Content-Type").unwrap().starts_with("text/html"));

    let missing = client.get("/nope.txt").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let climbing = client.get("/../etc/passwd").await;
    assert_eq!(climbing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_internal_endpoints_and_purge() {
    let client = ensure_server().await;

    let live = client.get("/healthz/liveness-probe").await;
    assert_eq!(live.status, StatusCode::OK);

    let version = client.get("/version").await;
    assert_eq!(version.status, StatusCode::OK);
    let info: serde_json::Value = serde_json::from_slice(&version.body).unwrap();
    assert_eq!(info["name"], "cachify");

    // Warm the cache, then drop it.
    client.get("/index.html").await;
    let ready = client.get("/healthz/readiness-probe").await;
    assert_eq!(ready.status, StatusCode::OK);

    let purged = client.send(Method::from_bytes(b"PURGE").unwrap(), "/").await;
    assert_eq!(purged.status, StatusCode::OK);
    assert_eq!(purged.body.as_ref(), b"invalidated");

    let metrics = client.get("/metrics").await;
    assert_eq!(metrics.status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&metrics.body).contains("cachify_requests_total"));
}

#[tokio::test]
async fn test_readiness_probe_alone_builds_the_cache() {
    spawn_server(PROBE_ONLY_ADDR).await;
    let client = TestClient::new(PROBE_ONLY_ADDR);

    let first = client.get("/healthz/readiness-probe").await;
    assert_eq!(first.status, StatusCode::SERVICE_UNAVAILABLE);

    let mut status = first.status;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = client.get("/healthz/readiness-probe").await.status;
        if status == StatusCode::OK {
            break;
        }
    }
    assert_eq!(status, StatusCode::OK);
}
