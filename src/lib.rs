pub mod access_log;
pub mod assets;
pub mod cache;
pub mod cachify;
pub mod compress;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod hasher;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod rewriter;
pub mod router;
pub mod runtime;
pub mod server;
pub mod singleflight;
pub mod statics;
pub mod watcher;

pub use crate::cachify::Cachify;
pub use crate::config::{AssetSource, AssetsConfig};
pub use crate::error::{CachifyError, CompressError, ConfigError, RewriteError};
pub use crate::rewriter::UrlRewriter;
