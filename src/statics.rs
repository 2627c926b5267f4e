use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;

use crate::middleware::{Body, BoxFuture, RoundTripper};

/// Serves plain files under the asset root. Sits at the end of the chain
/// and resolves redirect targets and development-mode URLs.
pub struct StaticFiles {
    root: Arc<PathBuf>,
}

impl StaticFiles {
    pub fn new(root: &Path) -> Self {
        Self {
            root: Arc::new(root.to_path_buf()),
        }
    }
}

impl RoundTripper for StaticFiles {
    fn round_trip(&self, req: Request<Body>) -> BoxFuture<Result<Response<Body>>> {
        let root = Arc::clone(&self.root);
        Box::pin(async move {
            if req.method() != Method::GET && req.method() != Method::HEAD {
                return Ok(status_response(StatusCode::METHOD_NOT_ALLOWED));
            }
            let Some(path) = safe_join(&root, req.uri().path()) else {
                return Ok(status_response(StatusCode::NOT_FOUND));
            };
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let content_type = mime_guess::from_path(&path).first_or_octet_stream();
                    let mut resp = Response::new(Full::new(Bytes::from(bytes)));
                    if let Ok(val) = content_type.as_ref().parse() {
                        resp.headers_mut().insert(CONTENT_TYPE, val);
                    }
                    Ok(resp)
                }
                Err(err) => {
                    log::debug!("static {} not served: {err}", path.display());
                    Ok(status_response(StatusCode::NOT_FOUND))
                }
            }
        })
    }
}

/// Maps a request path onto the root, refusing anything that climbs out.
pub fn safe_join(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut out = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out == root {
        return None;
    }
    Some(out)
}

fn status_response(status: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Full::new(Bytes::from(
        status.canonical_reason().unwrap_or("error").to_lowercase(),
    )));
    *resp.status_mut() = status;
    resp
}
