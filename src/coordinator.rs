use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::cache::{AssetCache, CacheStatus};
use crate::compress::Compressor;
use crate::error::CompressError;
use crate::metrics;
use crate::singleflight::Group;

/// Produces each entry's artifact at most once per outstanding call and
/// memoizes it in the entry. Failures are not cached.
pub struct CompressionCoordinator {
    compressor: Arc<dyn Compressor>,
    flights: Group<Result<Bytes, CompressError>>,
}

impl CompressionCoordinator {
    pub fn new(compressor: Arc<dyn Compressor>) -> Self {
        Self {
            compressor,
            flights: Group::new(),
        }
    }

    pub fn content_encoding(&self) -> Option<&'static str> {
        self.compressor.content_encoding()
    }

    pub async fn artifact(
        &self,
        cache: &Arc<AssetCache>,
        key: &str,
    ) -> Result<(Bytes, CacheStatus), CompressError> {
        let entry = cache
            .get(key)
            .ok_or_else(|| CompressError::UnknownAsset(key.to_string()))?;
        if let Some(artifact) = entry.compressed() {
            return Ok((artifact, CacheStatus::Hit));
        }

        // Keyed by fingerprint too, so a call started against a cache that
        // has since been rebuilt is never joined for different content.
        let flight = format!("{}{}", entry.hash(), key);
        let compressor = Arc::clone(&self.compressor);
        let cache = Arc::clone(cache);
        let name = key.to_string();
        let result = self
            .flights
            .do_call(&flight, move || async move { produce(compressor, cache, name).await })
            .await
            .unwrap_or_else(|| Err(CompressError::Abandoned(key.to_string())));
        result.map(|artifact| (artifact, CacheStatus::Miss))
    }
}

async fn produce(
    compressor: Arc<dyn Compressor>,
    cache: Arc<AssetCache>,
    key: String,
) -> Result<Bytes, CompressError> {
    let entry = cache
        .get(&key)
        .ok_or_else(|| CompressError::UnknownAsset(key.clone()))?;
    let source = match entry.source() {
        Some(source) => source,
        // Produced by a call that finished between our check and this one.
        None => return entry.compressed().ok_or_else(|| CompressError::Abandoned(key.clone())),
    };

    let started = Instant::now();
    log::debug!("compressing {key} ({} bytes)", source.len());
    match compressor.compress(&key, source).await {
        Ok(artifact) => {
            metrics::record_compression(true);
            log::info!(
                "compressed {key}: {} bytes in {}ms",
                artifact.len(),
                started.elapsed().as_millis()
            );
            entry.store_compressed(artifact.clone());
            Ok(artifact)
        }
        Err(err) => {
            metrics::record_compression(false);
            log::error!("{err}");
            Err(err)
        }
    }
}
