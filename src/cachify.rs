use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::assets::AssetSet;
use crate::cache::{AssetCache, CacheBuilder};
use crate::compress::Compressor;
use crate::config::AssetsConfig;
use crate::coordinator::CompressionCoordinator;
use crate::error::{CachifyError, ConfigError, GateError};
use crate::gate::{CacheGate, FailureHook, GateStatus};
use crate::middleware::{self, Middleware};
use crate::rewriter::UrlRewriter;
use crate::router::UrlRouter;

/// Handle to one configured asset cache. Cheap to clone; every clone shares
/// the same gate, cache and pending compressions.
#[derive(Clone)]
pub struct Cachify {
    shared: Arc<Shared>,
}

struct Shared {
    assets: Arc<AssetSet>,
    prefix: Arc<str>,
    development: bool,
    map: Arc<IndexMap<String, String>>,
    router: UrlRouter,
    gate: Arc<CacheGate>,
    coordinator: CompressionCoordinator,
}

impl Cachify {
    /// Validates the configuration synchronously; nothing is read until the
    /// first request.
    pub fn new(cfg: &AssetsConfig, compressor: Arc<dyn Compressor>) -> Result<Self, ConfigError> {
        let root = match &cfg.root {
            Some(root) => root.clone(),
            None => std::env::current_dir()
                .map_err(|_| ConfigError::RootMissing(Path::new(".").to_path_buf()))?,
        };
        let assets = Arc::new(AssetSet::validate(&root, &cfg.assets)?);
        let prefix = if cfg.prefix.is_empty() { "/" } else { cfg.prefix.as_str() };
        let router = UrlRouter::new(prefix)?;
        let gate = CacheGate::new(CacheBuilder::new(Arc::clone(&assets)));

        Ok(Self {
            shared: Arc::new(Shared {
                assets,
                prefix: Arc::from(prefix),
                development: cfg.development,
                map: Arc::new(cfg.map.clone()),
                router,
                gate,
                coordinator: CompressionCoordinator::new(compressor),
            }),
        })
    }

    pub fn on_build_failure(self, hook: FailureHook) -> Self {
        self.shared.gate.set_failure_hook(hook);
        self
    }

    pub fn root(&self) -> &Path {
        self.shared.assets.root()
    }

    pub fn prefix(&self) -> &str {
        &self.shared.prefix
    }

    pub fn is_development(&self) -> bool {
        self.shared.development
    }

    pub fn router(&self) -> &UrlRouter {
        &self.shared.router
    }

    pub fn coordinator(&self) -> &CompressionCoordinator {
        &self.shared.coordinator
    }

    pub fn status(&self) -> GateStatus {
        self.shared.gate.status()
    }

    /// Waits for the cache, building it if this is the first caller.
    pub async fn cache(&self) -> Result<Arc<AssetCache>, GateError> {
        self.shared.gate.acquire().await
    }

    pub fn invalidate(&self) -> bool {
        self.shared.gate.invalidate()
    }

    /// The request pipeline layer with the default `Cache-Control`.
    pub fn middleware(&self) -> Middleware {
        middleware::cachify::middleware(self.clone())
    }

    pub fn development_rewriter(&self) -> UrlRewriter {
        UrlRewriter::development(Arc::clone(&self.shared.assets), Arc::clone(&self.shared.map))
    }

    pub fn production_rewriter(&self, cache: Arc<AssetCache>) -> UrlRewriter {
        UrlRewriter::production(Arc::clone(&self.shared.prefix), cache)
    }

    pub async fn rewriter(&self) -> Result<UrlRewriter, GateError> {
        if self.shared.development {
            return Ok(self.development_rewriter());
        }
        let cache = self.cache().await?;
        Ok(self.production_rewriter(cache))
    }

    /// URLs to reference `key` from a page.
    pub async fn minified_url(&self, key: &str) -> Result<Vec<String>, CachifyError> {
        let rewriter = self.rewriter().await?;
        Ok(rewriter.rewrite(key)?)
    }
}
