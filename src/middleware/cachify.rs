use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, LOCATION};
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;

use crate::cache::CacheStatus;
use crate::cachify::Cachify;
use crate::config::MiddlewareConfig;
use crate::constants;
use crate::metrics;
use crate::middleware::{parse_options, Body, BoxFuture, Middleware, RoundTripper};
use crate::router::{self, Route};

const DEFAULT_MAX_AGE: u64 = 31_536_000;

#[derive(Debug, serde::Deserialize, Default, Clone)]
struct CachifyOptions {
    #[serde(default)]
    max_age: Option<u64>,
}

pub fn build(cfg: &MiddlewareConfig, cachify: Cachify) -> Result<Middleware> {
    let opts: CachifyOptions = parse_options(&cfg.options)?;
    let cache_control = HeaderValue::from_str(&format!(
        "public, max-age={}",
        opts.max_age.unwrap_or(DEFAULT_MAX_AGE)
    ))?;
    Ok(layer(cachify, cache_control))
}

/// The middleware with the default one-year `Cache-Control`.
pub fn middleware(cachify: Cachify) -> Middleware {
    let cache_control = HeaderValue::from_static("public, max-age=31536000");
    layer(cachify, cache_control)
}

fn layer(cachify: Cachify, cache_control: HeaderValue) -> Middleware {
    Arc::new(move |next: Arc<dyn RoundTripper>| {
        Arc::new(CachifyMiddleware {
            next,
            cachify: cachify.clone(),
            cache_control: cache_control.clone(),
        }) as Arc<dyn RoundTripper>
    })
}

struct CachifyMiddleware {
    next: Arc<dyn RoundTripper>,
    cachify: Cachify,
    cache_control: HeaderValue,
}

impl RoundTripper for CachifyMiddleware {
    fn round_trip(&self, req: Request<Body>) -> BoxFuture<Result<Response<Body>>> {
        let next = Arc::clone(&self.next);
        let cachify = self.cachify.clone();
        let cache_control = self.cache_control.clone();
        Box::pin(async move { handle_request(req, cachify, next, cache_control).await })
    }
}

async fn handle_request(
    mut req: Request<Body>,
    cachify: Cachify,
    next: Arc<dyn RoundTripper>,
    cache_control: HeaderValue,
) -> Result<Response<Body>> {
    if cachify.is_development() {
        req.extensions_mut().insert(cachify.development_rewriter());
        return pass(req, next).await;
    }

    let cache = match cachify.cache().await {
        Ok(cache) => cache,
        Err(err) => {
            log::error!("asset cache unavailable: {err}");
            metrics::record_outcome("error");
            return Ok(text_response(StatusCode::SERVICE_UNAVAILABLE, "asset cache unavailable"));
        }
    };

    let path = req.uri().path().to_string();
    match cachify.router().route(&path, &cache) {
        Route::Hit { key, .. } => match cachify.coordinator().artifact(&cache, key).await {
            Ok((body, status)) => {
                metrics::record_outcome("hit");
                Ok(asset_response(
                    key,
                    body,
                    status,
                    cache_control,
                    cachify.coordinator().content_encoding(),
                ))
            }
            Err(err) => {
                log::warn!("serving {path} failed: {err}");
                metrics::record_outcome("error");
                Ok(text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to generate resource"))
            }
        },
        Route::Stale { hash, key } => {
            log::debug!("stale or foreign hash {hash} for {key}, redirecting");
            metrics::record_outcome("redirect");
            Ok(redirect(&router::redirect_target(key)))
        }
        Route::Pass => {
            req.extensions_mut().insert(cachify.production_rewriter(cache));
            pass(req, next).await
        }
    }
}

async fn pass(req: Request<Body>, next: Arc<dyn RoundTripper>) -> Result<Response<Body>> {
    metrics::record_outcome("pass");
    let mut resp = next.round_trip(req).await?;
    resp.headers_mut()
        .entry(constants::CACHIFY_STATUS_KEY)
        .or_insert(HeaderValue::from_static(CacheStatus::Pass.as_str()));
    Ok(resp)
}

fn asset_response(
    key: &str,
    body: Bytes,
    status: CacheStatus,
    cache_control: HeaderValue,
    content_encoding: Option<&'static str>,
) -> Response<Body> {
    let content_type = mime_guess::from_path(key).first_or_octet_stream();
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CACHE_CONTROL, cache_control)
        .header(CONTENT_TYPE, content_type.as_ref())
        .header(constants::CACHIFY_STATUS_KEY, status.as_str());
    if let Some(encoding) = content_encoding {
        builder = builder.header(CONTENT_ENCODING, encoding);
    }
    builder
        .body(Full::new(body))
        .unwrap_or_else(|_| text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to generate resource"))
}

fn redirect(location: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location)
        .header(constants::CACHIFY_STATUS_KEY, CacheStatus::Redirect.as_str())
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| text_response(StatusCode::BAD_REQUEST, "invalid redirect target"))
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
