use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct Bootstrap {
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub pidfile: Option<String>,
    #[serde(default)]
    pub logger: Logger,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub compressor: CompressorConfig,
}

impl Bootstrap {
    pub fn validate(&self) -> Result<()> {
        if self.server.addr.trim().is_empty() {
            return Err(anyhow!("server.addr is required"));
        }
        if self.assets.assets.is_empty() {
            log::warn!("no assets declared, every request will pass through");
        }
        if self.compressor.kind == CompressorKind::Command && self.compressor.command.is_empty() {
            return Err(anyhow!("compressor.command must not be empty for kind 'command'"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Logger {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub caller: bool,
    #[serde(default)]
    pub traceid: bool,
    #[serde(default)]
    pub max_size: u64,
    #[serde(default)]
    pub max_backups: u64,
    #[serde(default)]
    pub nopid: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct Server {
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub middleware: Vec<MiddlewareConfig>,
    #[serde(default)]
    pub access_log: Option<ServerAccessLog>,
    #[serde(default)]
    pub local_api_allow_hosts: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServerAccessLog {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: HashMap<String, serde_yaml::Value>,
}

/// An asset may be declared as a single path or as an ordered list.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum AssetSource {
    One(String),
    Many(Vec<String>),
}

impl AssetSource {
    pub fn files(&self) -> Vec<String> {
        match self {
            AssetSource::One(file) => vec![file.clone()],
            AssetSource::Many(files) => files.clone(),
        }
    }
}

impl From<&str> for AssetSource {
    fn from(file: &str) -> Self {
        AssetSource::One(file.to_string())
    }
}

impl From<Vec<&str>> for AssetSource {
    fn from(files: Vec<&str>) -> Self {
        AssetSource::Many(files.into_iter().map(str::to_string).collect())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssetsConfig {
    /// Directory the asset files are resolved against. Defaults to the
    /// working directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub assets: IndexMap<String, AssetSource>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub development: bool,
    /// Development only: path prefix -> replacement, first match wins.
    #[serde(default)]
    pub map: IndexMap<String, String>,
    #[serde(default)]
    pub watch: bool,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: None,
            assets: IndexMap::new(),
            prefix: default_prefix(),
            development: false,
            map: IndexMap::new(),
            watch: false,
        }
    }
}

impl AssetsConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn asset(mut self, key: &str, source: impl Into<AssetSource>) -> Self {
        self.assets.insert(key.to_string(), source.into());
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn development(mut self, map: &[(&str, &str)]) -> Self {
        self.development = true;
        self.map = map
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        self
    }
}

fn default_prefix() -> String {
    "/".to_string()
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressorKind {
    #[default]
    Identity,
    Gzip,
    Command,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct CompressorConfig {
    #[serde(default)]
    pub kind: CompressorKind,
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub command: Vec<String>,
}

pub fn load(path: &Path) -> Result<(Bootstrap, Vec<String>)> {
    let raw = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    parse(&raw).with_context(|| format!("parse config {}", path.display()))
}

pub fn parse(raw: &str) -> Result<(Bootstrap, Vec<String>)> {
    let mut ignored = Vec::new();
    let de = serde_yaml::Deserializer::from_str(raw);
    let cfg: Bootstrap = serde_ignored::deserialize(de, |path| {
        ignored.push(path.to_string());
    })?;
    Ok((cfg, ignored))
}
