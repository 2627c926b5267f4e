use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use cachify::config;
use cachify::logging;
use cachify::server;

#[derive(Parser, Debug)]
#[command(name = "cachify", about = "Hash-stamped asset cache server", version)]
struct Cli {
    /// Config file path
    #[arg(short = 'c', default_value = "config.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Validate the config and the declared assets, then exit
    #[arg(short = 't', long = "test")]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (cfg, ignored) = config::load(&cli.config)?;

    logging::init(&cfg.logger, cli.verbose)?;

    if cfg.strict && !ignored.is_empty() {
        return Err(anyhow!("unknown config fields: {}", ignored.join(", ")));
    }
    if !ignored.is_empty() {
        log::warn!("ignoring unknown config fields: {}", ignored.join(", "));
    }

    cfg.validate()?;

    if cli.check {
        let keys = check_assets(&cfg)?;
        println!("config {} ok, {keys} asset keys", cli.config.display());
        return Ok(());
    }

    if let Some(pidfile) = &cfg.pidfile {
        write_pid(pidfile)?;
    }

    log::info!("cachify starting with config {}", cli.config.display());
    server::run(Arc::new(cfg)).await
}

/// Runs the synchronous asset validation without serving anything.
fn check_assets(cfg: &config::Bootstrap) -> Result<usize> {
    let compressor = cachify::compress::from_config(&cfg.compressor)?;
    cachify::Cachify::new(&cfg.assets, compressor).context("configure assets")?;
    Ok(cfg.assets.assets.len())
}

fn write_pid(path: &str) -> Result<()> {
    let pid = std::process::id();
    let path = PathBuf::from(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create pid dir {}", parent.display()))?;
    }
    std::fs::write(&path, pid.to_string()).with_context(|| format!("write pid file {}", path.display()))?;
    Ok(())
}
