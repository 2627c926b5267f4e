use std::sync::Arc;

use indexmap::IndexMap;

use crate::assets::AssetSet;
use crate::cache::AssetCache;
use crate::error::RewriteError;

/// Turns logical asset keys into the URLs pages should reference.
///
/// Attached to every request that falls through the cachify middleware, so
/// downstream handlers can look it up in the request extensions.
#[derive(Clone)]
pub struct UrlRewriter {
    mode: Mode,
}

#[derive(Clone)]
enum Mode {
    Production {
        prefix: Arc<str>,
        cache: Arc<AssetCache>,
    },
    Development {
        assets: Arc<AssetSet>,
        map: Arc<IndexMap<String, String>>,
    },
}

impl UrlRewriter {
    pub fn production(prefix: Arc<str>, cache: Arc<AssetCache>) -> Self {
        Self {
            mode: Mode::Production { prefix, cache },
        }
    }

    pub fn development(assets: Arc<AssetSet>, map: Arc<IndexMap<String, String>>) -> Self {
        Self {
            mode: Mode::Development { assets, map },
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self.mode, Mode::Development { .. })
    }

    /// In production a single `<prefix><hash><key>` URL; in development one
    /// unstamped URL per underlying file.
    pub fn rewrite(&self, key: &str) -> Result<Vec<String>, RewriteError> {
        match &self.mode {
            Mode::Production { prefix, cache } => {
                let hash = cache
                    .hash(key)
                    .ok_or_else(|| RewriteError::UnknownAsset(key.to_string()))?;
                Ok(vec![format!("{prefix}{hash}{key}")])
            }
            Mode::Development { assets, map } => {
                let group = assets
                    .get(key)
                    .ok_or_else(|| RewriteError::UnknownAsset(key.to_string()))?;
                Ok(group.files().iter().map(|file| map_path(map, file)).collect())
            }
        }
    }
}

/// Applies the first rule whose prefix matches, once.
pub fn map_path(map: &IndexMap<String, String>, path: &str) -> String {
    map.iter()
        .find_map(|(from, to)| path.strip_prefix(from.as_str()).map(|rest| format!("{to}{rest}")))
        .unwrap_or_else(|| path.to_string())
}
