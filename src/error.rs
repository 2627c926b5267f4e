use std::path::PathBuf;

use thiserror::Error;

/// Raised synchronously while validating the asset configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("root path does not exist: {0}")]
    RootMissing(PathBuf),
    #[error("root path is not a directory: {0}")]
    RootNotDirectory(PathBuf),
    #[error("'{0}' has malformed asset list")]
    MalformedAssetList(String),
    #[error("'{file}' file does not exist (asset '{key}')")]
    MissingFile { key: String, file: String },
    #[error("invalid prefix '{0}'")]
    InvalidPrefix(String),
    #[error("build url pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("read asset '{key}' file {path}: {source}")]
    Read {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Delivered to every request queued behind a cache build.
#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("asset cache build failed: {0}")]
    BuildFailed(String),
    #[error("asset cache build was abandoned")]
    Abandoned,
}

#[derive(Debug, Clone, Error)]
pub enum CompressError {
    #[error("failed to compress '{name}': {message}")]
    Failed { name: String, message: String },
    #[error("asset '{0}' is not in the cache")]
    UnknownAsset(String),
    #[error("compression of '{0}' was abandoned")]
    Abandoned(String),
}

impl CompressError {
    pub fn failed(name: &str, message: impl ToString) -> Self {
        CompressError::Failed {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RewriteError {
    #[error("cannot rewrite unknown asset '{0}'")]
    UnknownAsset(String),
}

#[derive(Debug, Error)]
pub enum CachifyError {
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
}
