#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cachify::compress::Compressor;
use cachify::config::AssetsConfig;
use cachify::error::{BuildError, CompressError};
use cachify::middleware::{self, BoxFuture, RoundTripper, RoundTripperFn};
use cachify::{Cachify, UrlRewriter};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;

/// Temporary asset root populated with the given files.
pub struct AssetDir {
    dir: tempfile::TempDir,
}

impl AssetDir {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let assets = Self { dir };
        for (name, content) in files {
            assets.write(name, content);
        }
        assets
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) {
        let path = self.file(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create dir");
        }
        std::fs::write(path, content).expect("write asset");
    }

    pub fn remove(&self, name: &str) {
        std::fs::remove_file(self.file(name)).expect("remove asset");
    }

    pub fn config(&self) -> AssetsConfig {
        AssetsConfig::new(self.path())
    }
}

/// Compression double: prefixes the source with `min:` and counts calls.
#[derive(Clone, Default)]
pub struct CountingCompressor {
    calls: Arc<AtomicUsize>,
    names: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    fail_first: usize,
}

impl CountingCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `n` calls fail.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

impl Compressor for CountingCompressor {
    fn compress(&self, name: &str, content: Bytes) -> BoxFuture<Result<Bytes, CompressError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.names.lock().unwrap().push(name.to_string());
        let delay = self.delay;
        let fail = call < self.fail_first;
        let name = name.to_string();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(CompressError::failed(&name, "boom"));
            }
            let mut out = b"min:".to_vec();
            out.extend_from_slice(&content);
            Ok(Bytes::from(out))
        })
    }
}

/// Records build failures instead of exiting the test process.
#[derive(Clone, Default)]
pub struct FailureLog {
    errors: Arc<Mutex<Vec<String>>>,
}

impl FailureLog {
    pub fn hook(&self) -> cachify::gate::FailureHook {
        let errors = Arc::clone(&self.errors);
        Arc::new(move |err: &BuildError| errors.lock().unwrap().push(err.to_string()))
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

pub fn cachify_with(cfg: &AssetsConfig, compressor: &CountingCompressor) -> Cachify {
    Cachify::new(cfg, Arc::new(compressor.clone()))
        .expect("valid config")
        .on_build_failure(FailureLog::default().hook())
}

#[derive(Clone, Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// URLs the downstream handler saw for the probed key, if it ran.
    pub rewritten: Option<Result<Vec<String>, String>>,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The cachify middleware in front of a downstream handler that answers
/// 204 and reports what the attached rewriter makes of `probe_key`.
pub struct Pipeline {
    inner: Arc<dyn RoundTripper>,
}

impl Pipeline {
    pub fn new(cachify: &Cachify, probe_key: &str) -> Self {
        let probe_key = probe_key.to_string();
        let downstream = Arc::new(RoundTripperFn(move |req: Request<Full<Bytes>>| {
            let rewritten = req
                .extensions()
                .get::<UrlRewriter>()
                .map(|rw| rw.rewrite(&probe_key).map_err(|e| e.to_string()));
            let body = match rewritten {
                Some(Ok(urls)) => format!("ok:{}", urls.join(",")),
                Some(Err(err)) => format!("err:{err}"),
                None => "none".to_string(),
            };
            let resp = Response::builder()
                .status(StatusCode::NO_CONTENT)
                .header("X-Downstream", "1")
                .body(Full::new(Bytes::from(body)))
                .unwrap();
            Box::pin(async move { Ok(resp) }) as BoxFuture<anyhow::Result<Response<Full<Bytes>>>>
        }));
        Self {
            inner: middleware::chain(&[cachify.middleware()], downstream),
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let req = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = self.inner.round_trip(req).await.expect("round trip");
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let rewritten = if headers.contains_key("X-Downstream") {
            let text = String::from_utf8_lossy(&body).to_string();
            if let Some(urls) = text.strip_prefix("ok:") {
                Some(Ok(urls.split(',').map(str::to_string).collect()))
            } else {
                text.strip_prefix("err:").map(|err| Err(err.to_string()))
            }
        } else {
            None
        };
        TestResponse {
            status,
            headers,
            body,
            rewritten,
        }
    }
}

/// Minimal HTTP/1 client for end-to-end tests.
#[derive(Clone)]
pub struct TestClient {
    addr: SocketAddr,
}

impl TestClient {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.parse().expect("server addr"),
        }
    }

    pub async fn send(&self, method: Method, path: &str) -> TestResponse {
        let stream = tokio::net::TcpStream::connect(self.addr)
            .await
            .expect("connect server");
        let io = TokioIo::new(stream);
        let (mut sender, conn) = http1::handshake(io).await.expect("handshake");
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header(http::header::HOST, "localhost")
            .body(Full::new(Bytes::new()))
            .expect("request");
        let resp = sender.send_request(req).await.expect("send request");
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.expect("body").to_bytes();
        TestResponse {
            status,
            headers,
            body,
            rewritten: None,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(Method::GET, path).await
    }
}
