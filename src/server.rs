use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body as _, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;

use crate::access_log::{AccessLogger, AccessRecord};
use crate::cachify::Cachify;
use crate::compress;
use crate::config::{Bootstrap, MiddlewareConfig};
use crate::constants;
use crate::gate::GateStatus;
use crate::logging;
use crate::metrics;
use crate::middleware::{self, Body, RoundTripper};
use crate::runtime;
use crate::statics::StaticFiles;
use crate::watcher;

const DEFAULT_LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "127.1", "[::1]"];

/// Builds the asset cache from the bootstrap config and serves it.
pub async fn run(cfg: Arc<Bootstrap>) -> Result<()> {
    let compressor = compress::from_config(&cfg.compressor).context("configure compressor")?;
    let cachify = Cachify::new(&cfg.assets, compressor).context("configure assets")?;
    serve(cfg, cachify).await
}

/// Serves an already configured cache; the caller picks the compressor and
/// build failure policy.
pub async fn serve(cfg: Arc<Bootstrap>, cachify: Cachify) -> Result<()> {
    if cfg.assets.watch && !cachify.is_development() {
        watcher::start_source_watcher(cachify.clone());
    }

    let pipeline = build_pipeline(&cfg, &cachify)?;
    let state = Arc::new(AppState {
        local_hosts: build_local_hosts(&cfg),
        access_logger: build_access_logger(&cfg),
        cachify,
        pipeline,
    });

    let addr = cfg.server.addr.clone();
    let listener = bind_listener(&addr)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handlers(shutdown_tx);
    log::info!("cachify listening on {addr}");

    let result = match listener {
        ListenerKind::Tcp(listener) => run_tcp(listener, shutdown_rx, state).await,
        ListenerKind::Unix { listener, path } => {
            let result = run_unix(listener, shutdown_rx, state).await;
            std::fs::remove_file(&path).ok();
            result
        }
    };
    log::info!("cachify stopped");
    result
}

struct AppState {
    local_hosts: HashSet<String>,
    access_logger: Option<AccessLogger>,
    cachify: Cachify,
    pipeline: Arc<dyn RoundTripper>,
}

fn build_pipeline(cfg: &Bootstrap, cachify: &Cachify) -> Result<Arc<dyn RoundTripper>> {
    let defaults = default_middleware();
    let configured = if cfg.server.middleware.is_empty() {
        &defaults
    } else {
        &cfg.server.middleware
    };

    let mut middlewares = Vec::new();
    let mut has_cachify = false;
    for mw in configured {
        let mw_fn = match mw.name.to_lowercase().as_str() {
            "cachify" => {
                has_cachify = true;
                middleware::cachify::build(mw, cachify.clone())?
            }
            "recovery" => middleware::recovery::build(mw)?,
            other => {
                log::warn!("unknown middleware {other}, skipped");
                continue;
            }
        };
        middlewares.push(mw_fn);
    }
    if !has_cachify {
        log::warn!("cachify middleware not configured, appending it");
        middlewares.push(cachify.middleware());
    }

    let base = Arc::new(StaticFiles::new(cachify.root()));
    Ok(middleware::chain(&middlewares, base))
}

fn default_middleware() -> Vec<MiddlewareConfig> {
    ["recovery", "cachify"]
        .into_iter()
        .map(|name| MiddlewareConfig {
            name: name.to_string(),
            options: Default::default(),
        })
        .collect()
}

fn build_local_hosts(cfg: &Bootstrap) -> HashSet<String> {
    DEFAULT_LOCAL_HOSTS
        .iter()
        .map(|h| h.to_string())
        .chain(cfg.server.local_api_allow_hosts.iter().cloned())
        .collect()
}

fn build_access_logger(cfg: &Bootstrap) -> Option<AccessLogger> {
    let access = cfg.server.access_log.as_ref().filter(|a| a.enabled)?;
    match AccessLogger::new(Some(&access.path)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            log::warn!("failed to init access log: {err:#}");
            None
        }
    }
}

fn is_unix_addr(addr: &str) -> bool {
    addr.starts_with("unix://") || addr.ends_with(".sock") || addr.starts_with('/')
}

enum ListenerKind {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: String },
}

fn bind_listener(addr: &str) -> Result<ListenerKind> {
    if is_unix_addr(addr) {
        let path = addr.strip_prefix("unix://").unwrap_or(addr);
        let path_ref = Path::new(path);
        if path_ref.exists() {
            std::fs::remove_file(path_ref).ok();
        }
        let listener = std::os::unix::net::UnixListener::bind(path_ref).context("bind unix socket")?;
        listener.set_nonblocking(true)?;
        return Ok(ListenerKind::Unix {
            listener: UnixListener::from_std(listener)?,
            path: path.to_string(),
        });
    }

    let bind_addr = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    let socket_addr: SocketAddr = bind_addr.parse().context("parse server.addr")?;
    let listener = std::net::TcpListener::bind(socket_addr).context("bind tcp")?;
    listener.set_nonblocking(true)?;
    Ok(ListenerKind::Tcp(TcpListener::from_std(listener)?))
}

fn spawn_signal_handlers(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();
        tokio::select! {
            _ = async {
                match sigterm.as_mut() {
                    Some(sig) => { sig.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {}
            _ = async {
                match sigint.as_mut() {
                    Some(sig) => { sig.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {}
        }
        log::info!("shutdown signal received");
        let _ = shutdown.send(true);
    });
}

async fn run_tcp(listener: TcpListener, mut shutdown: watch::Receiver<bool>, state: Arc<AppState>) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            res = listener.accept() => {
                let (stream, peer) = res.context("accept tcp")?;
                spawn_connection(stream, peer.ip().to_string(), Arc::clone(&state));
            }
        }
    }
    Ok(())
}

async fn run_unix(listener: UnixListener, mut shutdown: watch::Receiver<bool>, state: Arc<AppState>) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            res = listener.accept() => {
                let (stream, _) = res.context("accept unix")?;
                spawn_connection(stream, "unix".to_string(), Arc::clone(&state));
            }
        }
    }
    Ok(())
}

fn spawn_connection<S>(stream: S, peer: String, state: Arc<AppState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    tokio::spawn(async move {
        let service = service_fn(move |req| handle(req, peer.clone(), Arc::clone(&state)));
        let builder = ConnBuilder::new(TokioExecutor::new());
        if let Err(err) = builder.serve_connection(io, service).await {
            log::debug!("http connection error: {err}");
        }
    });
}

async fn handle(req: Request<Incoming>, peer: String, state: Arc<AppState>) -> Result<Response<Body>, hyper::Error> {
    let started = Instant::now();
    let info = RequestInfo::from_request(&req, peer);
    let request_id = info.request_id.clone();

    let mut resp = logging::with_trace_id(request_id, async {
        let is_local = state.local_hosts.contains(info.host.as_str());
        if is_local {
            if let Some(resp) = handle_internal(req.uri().path(), &state) {
                return resp;
            }
            if req.method().as_str() == "PURGE" {
                return handle_purge(&state);
            }
        }
        handle_pipeline(req, &state).await
    })
    .await;

    metrics::record(resp.status());
    if let Ok(val) = info.request_id.parse() {
        resp.headers_mut().insert(constants::PROTOCOL_REQUEST_ID_KEY, val);
    }
    log_access(&state, &info, &resp, started);
    Ok(resp)
}

fn handle_internal(path: &str, state: &AppState) -> Option<Response<Body>> {
    let resp = match path {
        "/healthz/startup-probe" => text_response(StatusCode::OK, "ok"),
        "/healthz/liveness-probe" => empty_response(StatusCode::OK),
        "/healthz/readiness-probe" => readiness(&state.cachify),
        "/version" => json_response(&runtime::build_info(state.cachify.status())),
        "/metrics" => text_response(StatusCode::OK, &metrics::render()),
        _ => return None,
    };
    Some(resp)
}

/// Ready once the cache is built. An absent cache is built in the background
/// so a pod that receives no traffic until it is ready still gets there.
fn readiness(cachify: &Cachify) -> Response<Body> {
    if cachify.is_development() {
        return empty_response(StatusCode::OK);
    }
    match cachify.status() {
        GateStatus::Ready => empty_response(StatusCode::OK),
        GateStatus::Building => empty_response(StatusCode::SERVICE_UNAVAILABLE),
        GateStatus::Absent => {
            let cachify = cachify.clone();
            tokio::spawn(async move {
                if let Err(err) = cachify.cache().await {
                    log::warn!("warming asset cache from readiness probe: {err}");
                }
            });
            empty_response(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

fn handle_purge(state: &AppState) -> Response<Body> {
    if state.cachify.invalidate() {
        text_response(StatusCode::OK, "invalidated")
    } else {
        text_response(StatusCode::CONFLICT, state.cachify.status().as_str())
    }
}

async fn handle_pipeline(req: Request<Incoming>, state: &AppState) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            log::debug!("read request body: {err}");
            return text_response(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };
    let req = Request::from_parts(parts, Full::new(body));
    match state.pipeline.round_trip(req).await {
        Ok(resp) => resp,
        Err(err) => {
            log::error!("pipeline error: {err:#}");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

struct RequestInfo {
    method: Method,
    uri: String,
    client_ip: String,
    host: String,
    referer: String,
    user_agent: String,
    request_id: String,
}

impl RequestInfo {
    fn from_request(req: &Request<Incoming>, peer: String) -> Self {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        let host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().host().map(str::to_string))
            .unwrap_or_default();
        let host = strip_port(&host).to_string();
        let forwarded = header("X-Forwarded-For");
        let client_ip = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or(peer);
        Self {
            method: req.method().clone(),
            uri: req.uri().to_string(),
            client_ip,
            host,
            referer: header("Referer"),
            user_agent: header("User-Agent"),
            request_id: metrics::request_id_from_headers(req.headers()),
        }
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_once(']').map(|(h, _)| &host[..h.len() + 1]).unwrap_or(host);
    }
    host.split_once(':').map(|(h, _)| h).unwrap_or(host)
}

fn log_access(state: &AppState, info: &RequestInfo, resp: &Response<Body>, started: Instant) {
    let Some(logger) = &state.access_logger else { return };
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    };
    logger.log(&AccessRecord {
        client_ip: &info.client_ip,
        host: &info.host,
        method: info.method.as_str(),
        uri: &info.uri,
        status: resp.status().as_u16(),
        content_type: header(CONTENT_TYPE.as_str()),
        body_len: resp.body().size_hint().exact().unwrap_or(0),
        duration_ms: started.elapsed().as_millis(),
        referer: &info.referer,
        user_agent: &info.user_agent,
        cachify_status: header(constants::CACHIFY_STATUS_KEY),
        request_id: &info.request_id,
    });
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Full::new(Bytes::new()));
    *resp.status_mut() = status;
    resp
}

fn text_response(status: StatusCode, body: &str) -> Response<Body> {
    let mut resp = Response::new(Full::new(Bytes::from(body.to_string())));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

fn json_response<T: serde::Serialize>(payload: &T) -> Response<Body> {
    match serde_json::to_vec(payload) {
        Ok(bytes) => {
            let mut resp = Response::new(Full::new(Bytes::from(bytes)));
            resp.headers_mut().insert(
                CONTENT_TYPE,
                http::HeaderValue::from_static("application/json; charset=utf-8"),
            );
            resp
        }
        Err(_) => text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode"),
    }
}
