use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Request and response bodies inside the pipeline are fully buffered.
pub type Body = Full<Bytes>;

pub trait RoundTripper: Send + Sync {
    fn round_trip(&self, req: Request<Body>) -> BoxFuture<Result<Response<Body>>>;
}

pub struct RoundTripperFn<F>(pub F);

impl<F> RoundTripper for RoundTripperFn<F>
where
    F: Fn(Request<Body>) -> BoxFuture<Result<Response<Body>>> + Send + Sync,
{
    fn round_trip(&self, req: Request<Body>) -> BoxFuture<Result<Response<Body>>> {
        (self.0)(req)
    }
}

pub type Middleware = Arc<dyn Fn(Arc<dyn RoundTripper>) -> Arc<dyn RoundTripper> + Send + Sync>;

pub fn chain(middlewares: &[Middleware], next: Arc<dyn RoundTripper>) -> Arc<dyn RoundTripper> {
    let mut current = next;
    for mw in middlewares.iter().rev() {
        current = mw(current);
    }
    current
}

pub fn parse_options<T>(options: &std::collections::HashMap<String, serde_yaml::Value>) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if options.is_empty() {
        return Ok(T::default());
    }
    let val = serde_yaml::to_value(options)?;
    Ok(serde_yaml::from_value(val)?)
}

pub mod cachify;
pub mod recovery;
