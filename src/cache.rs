//! The in-memory asset cache and its builder.
//!
//! A cache is built in one piece: every declared key gets an entry holding
//! its concatenated source and fingerprint, or the build fails and nothing
//! is published. The compressed artifact replaces the source the first time
//! the entry is served.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use futures::future::try_join_all;

use crate::assets::{self, AssetSet};
use crate::error::BuildError;
use crate::hasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Artifact was produced for this request.
    Miss,
    /// Artifact was already memoized.
    Hit,
    Redirect,
    Pass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Miss => "MISS",
            CacheStatus::Hit => "HIT",
            CacheStatus::Redirect => "REDIRECT",
            CacheStatus::Pass => "PASS",
        }
    }
}

#[derive(Debug)]
enum Body {
    Source(Bytes),
    Compressed(Bytes),
}

#[derive(Debug)]
pub struct CacheEntry {
    hash: String,
    body: Mutex<Body>,
}

impl CacheEntry {
    pub fn new(source: Bytes) -> Self {
        Self {
            hash: hasher::fingerprint(&source),
            body: Mutex::new(Body::Source(source)),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn source(&self) -> Option<Bytes> {
        match &*self.body.lock().expect("cache entry") {
            Body::Source(source) => Some(source.clone()),
            Body::Compressed(_) => None,
        }
    }

    pub fn compressed(&self) -> Option<Bytes> {
        match &*self.body.lock().expect("cache entry") {
            Body::Compressed(artifact) => Some(artifact.clone()),
            Body::Source(_) => None,
        }
    }

    /// Stores the artifact and retires the source.
    pub(crate) fn store_compressed(&self, artifact: Bytes) {
        *self.body.lock().expect("cache entry") = Body::Compressed(artifact);
    }
}

/// A fully populated cache: one entry per declared asset key.
#[derive(Debug, Default)]
pub struct AssetCache {
    entries: HashMap<String, CacheEntry>,
}

impl AssetCache {
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn hash(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(CacheEntry::hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, CacheEntry)> for AssetCache {
    fn from_iter<I: IntoIterator<Item = (String, CacheEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheBuilder {
    assets: Arc<AssetSet>,
}

impl CacheBuilder {
    pub fn new(assets: Arc<AssetSet>) -> Self {
        Self { assets }
    }

    /// Loads every group concurrently. Resolves only once every key has an
    /// entry; the first read failure fails the whole build.
    pub async fn build(&self) -> Result<AssetCache, BuildError> {
        let started = Instant::now();
        let root = self.assets.root();
        let tasks = self.assets.groups().map(|group| async move {
            let source = assets::load_group(root, group).await?;
            Ok::<_, BuildError>((group.key().to_string(), CacheEntry::new(source)))
        });
        let cache: AssetCache = try_join_all(tasks).await?.into_iter().collect();
        log::info!(
            "asset cache built: {} keys in {}ms",
            cache.len(),
            started.elapsed().as_millis()
        );
        Ok(cache)
    }
}
