use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use futures::FutureExt;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;

use crate::config::MiddlewareConfig;
use crate::metrics;
use crate::middleware::{parse_options, Body, BoxFuture, Middleware, RoundTripper};

#[derive(Debug, serde::Deserialize, Default, Clone)]
struct RecoveryOptions {
    /// Panics within one window before an error is logged.
    #[serde(default)]
    fail_count_threshold: Option<u64>,
    /// Window length in seconds. Zero or unset never resets the count.
    #[serde(default)]
    fail_window: Option<u64>,
}

/// Panics seen since the last window reset.
struct Panics {
    count: AtomicU64,
    threshold: u64,
}

impl Panics {
    fn bump(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn over_threshold(&self, count: u64) -> bool {
        self.threshold > 0 && count >= self.threshold
    }
}

/// Turns a panic anywhere downstream, the cachify layer included, into a
/// plain 500 instead of a dropped connection.
pub fn build(cfg: &MiddlewareConfig) -> Result<Middleware> {
    let opts: RecoveryOptions = parse_options(&cfg.options)?;
    let panics = Arc::new(Panics {
        count: AtomicU64::new(0),
        threshold: opts.fail_count_threshold.unwrap_or(0),
    });
    if let Some(window) = opts.fail_window.filter(|w| *w > 0) {
        reset_every(Arc::clone(&panics), Duration::from_secs(window));
    }

    let middleware: Middleware = Arc::new(move |next: Arc<dyn RoundTripper>| {
        Arc::new(RecoveryMiddleware {
            next,
            panics: Arc::clone(&panics),
        }) as Arc<dyn RoundTripper>
    });
    Ok(middleware)
}

fn reset_every(panics: Arc<Panics>, window: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(window);
        loop {
            ticker.tick().await;
            panics.count.store(0, Ordering::Relaxed);
        }
    });
}

struct RecoveryMiddleware {
    next: Arc<dyn RoundTripper>,
    panics: Arc<Panics>,
}

impl RoundTripper for RecoveryMiddleware {
    fn round_trip(&self, req: Request<Body>) -> BoxFuture<Result<Response<Body>>> {
        let next = Arc::clone(&self.next);
        let panics = Arc::clone(&self.panics);
        let path = req.uri().path().to_string();
        Box::pin(async move {
            match AssertUnwindSafe(next.round_trip(req)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Ok(panicked(&panics, &path)),
            }
        })
    }
}

fn panicked(panics: &Panics, path: &str) -> Response<Body> {
    let count = panics.bump();
    metrics::record_outcome("error");
    log::error!("panic while serving {path}, recovered ({count} in window)");
    if panics.over_threshold(count) {
        log::error!("recovery fail count threshold {} reached", panics.threshold);
    }
    let mut resp = Response::new(Full::new(Bytes::from_static(b"internal server error")));
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    resp
}
