//! Validation and loading of declared asset groups.
//!
//! Validation runs synchronously when the cache is configured so that a
//! misconfigured root or a missing file fails before any traffic is served.
//! Loading reads every file of a group concurrently and joins the contents
//! in declared order.

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures::future::try_join_all;
use indexmap::IndexMap;

use crate::config::AssetSource;
use crate::error::{BuildError, ConfigError};

const SEPARATOR: u8 = b'\n';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetGroup {
    key: String,
    files: Vec<String>,
}

impl AssetGroup {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }
}

/// The validated, immutable set of asset groups under a root directory.
#[derive(Debug, Clone)]
pub struct AssetSet {
    root: PathBuf,
    groups: IndexMap<String, AssetGroup>,
}

impl AssetSet {
    pub fn validate(root: &Path, assets: &IndexMap<String, AssetSource>) -> Result<Self, ConfigError> {
        if !root.exists() {
            return Err(ConfigError::RootMissing(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ConfigError::RootNotDirectory(root.to_path_buf()));
        }

        let mut groups = IndexMap::with_capacity(assets.len());
        for (key, source) in assets {
            let files = source.files();
            if files.is_empty() || files.iter().any(|f| f.trim().is_empty()) {
                return Err(ConfigError::MalformedAssetList(key.clone()));
            }
            for file in &files {
                if !resolve(root, file).is_file() {
                    return Err(ConfigError::MissingFile {
                        key: key.clone(),
                        file: file.clone(),
                    });
                }
            }
            groups.insert(
                key.clone(),
                AssetGroup {
                    key: key.clone(),
                    files,
                },
            );
        }

        Ok(Self {
            root: root.to_path_buf(),
            groups,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, key: &str) -> Option<&AssetGroup> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> impl Iterator<Item = &AssetGroup> {
        self.groups.values()
    }
}

/// Joins a declared file path onto the root. Declared paths are relative
/// even when written with a leading slash.
pub fn resolve(root: &Path, file: &str) -> PathBuf {
    root.join(file.trim_start_matches('/'))
}

/// Reads every file of the group and concatenates them in declared order.
pub async fn load_group(root: &Path, group: &AssetGroup) -> Result<Bytes, BuildError> {
    let reads = group.files.iter().map(|file| {
        let path = resolve(root, file);
        async move {
            tokio::fs::read(&path)
                .await
                .map(Bytes::from)
                .map_err(|source| BuildError::Read {
                    key: group.key.clone(),
                    path,
                    source,
                })
        }
    });
    let parts = try_join_all(reads).await?;
    Ok(concat(&parts))
}

/// Newline between parts, none before the first or after the last.
pub fn concat(parts: &[Bytes]) -> Bytes {
    let len = parts.iter().map(Bytes::len).sum::<usize>() + parts.len().saturating_sub(1);
    let mut buf = BytesMut::with_capacity(len);
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            buf.extend_from_slice(&[SEPARATOR]);
        }
        buf.extend_from_slice(part);
    }
    buf.freeze()
}
