//! The compression collaborator and the implementations shipped with the
//! server binary.

use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as ProcessCommand;

use crate::config::{CompressorConfig, CompressorKind};
use crate::error::CompressError;
use crate::middleware::BoxFuture;

const DEFAULT_GZIP_LEVEL: u32 = 6;

pub trait Compressor: Send + Sync {
    /// Produces the served artifact for the named asset from its raw source.
    fn compress(&self, name: &str, content: Bytes) -> BoxFuture<Result<Bytes, CompressError>>;

    /// `Content-Encoding` of the produced artifact, if it is encoded.
    fn content_encoding(&self) -> Option<&'static str> {
        None
    }
}

pub struct Identity;

impl Compressor for Identity {
    fn compress(&self, _name: &str, content: Bytes) -> BoxFuture<Result<Bytes, CompressError>> {
        Box::pin(async move { Ok(content) })
    }
}

pub struct Gzip {
    level: u32,
}

impl Gzip {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Compressor for Gzip {
    fn compress(&self, name: &str, content: Bytes) -> BoxFuture<Result<Bytes, CompressError>> {
        let name = name.to_string();
        let level = self.level;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut encoder = GzEncoder::new(Vec::with_capacity(content.len() / 2), Compression::new(level));
                encoder
                    .write_all(&content)
                    .and_then(|_| encoder.finish())
                    .map(Bytes::from)
                    .map_err(|err| CompressError::failed(&name, err))
            })
            .await
            .unwrap_or_else(|err| Err(CompressError::failed("gzip", format!("join error: {err}"))))
        })
    }

    fn content_encoding(&self) -> Option<&'static str> {
        Some("gzip")
    }
}

/// Pipes the source through an external program, e.g. a minifier.
/// The asset name is exported as `CACHIFY_ASSET_NAME`.
pub struct Command {
    program: String,
    args: Vec<String>,
}

impl Command {
    pub fn new(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("compressor command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Compressor for Command {
    fn compress(&self, name: &str, content: Bytes) -> BoxFuture<Result<Bytes, CompressError>> {
        let name = name.to_string();
        let program = self.program.clone();
        let args = self.args.clone();
        Box::pin(async move {
            let mut child = ProcessCommand::new(&program)
                .args(&args)
                .env("CACHIFY_ASSET_NAME", &name)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| CompressError::failed(&name, format!("spawn {program}: {err}")))?;

            // Fed from its own task so a child filling stdout cannot stall us.
            let feeder = child.stdin.take().map(|mut stdin| {
                tokio::spawn(async move {
                    stdin.write_all(&content).await?;
                    stdin.shutdown().await
                })
            });

            let output = child
                .wait_with_output()
                .await
                .map_err(|err| CompressError::failed(&name, format!("wait {program}: {err}")))?;
            if let Some(feeder) = feeder {
                match feeder.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(CompressError::failed(&name, format!("write stdin: {err}"))),
                    Err(err) => return Err(CompressError::failed(&name, format!("join stdin: {err}"))),
                }
            }
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(CompressError::failed(
                    &name,
                    format!("{program} exited with {}: {}", output.status, stderr.trim()),
                ));
            }
            Ok(Bytes::from(output.stdout))
        })
    }
}

pub fn from_config(cfg: &CompressorConfig) -> Result<Arc<dyn Compressor>> {
    let compressor: Arc<dyn Compressor> = match cfg.kind {
        CompressorKind::Identity => Arc::new(Identity),
        CompressorKind::Gzip => Arc::new(Gzip::new(cfg.level.unwrap_or(DEFAULT_GZIP_LEVEL))),
        CompressorKind::Command => Arc::new(Command::new(&cfg.command)?),
    };
    Ok(compressor)
}
