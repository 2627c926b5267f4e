use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use flexi_logger::{
    Cleanup, Criterion, DeferredNow, Duplicate, FileSpec, Logger as FlexiLogger, LoggerHandle, Naming,
    WriteMode,
};
use log::{LevelFilter, Record};
use tokio::task_local;

use crate::config::Logger;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const MIB: u64 = 1024 * 1024;

/// Optional columns of a log line, fixed at startup.
#[derive(Clone, Copy)]
struct Columns {
    pid: bool,
    caller: bool,
    trace_id: bool,
}

const DEFAULT_COLUMNS: Columns = Columns {
    pid: true,
    caller: false,
    trace_id: false,
};

static COLUMNS: OnceLock<Columns> = OnceLock::new();
static HANDLE: OnceLock<LoggerHandle> = OnceLock::new();

task_local! {
    static TRACE_ID: String;
}

pub fn init(config: &Logger, verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        parse_level(&config.level)
    };
    COLUMNS.get_or_init(|| Columns {
        pid: !config.nopid,
        caller: config.caller,
        trace_id: config.traceid,
    });

    let mut logger = FlexiLogger::try_with_str(level.as_str())
        .context("init logger")?
        .log_to_stdout()
        .format_for_stdout(format_line);
    if !config.path.trim().is_empty() {
        logger = to_file(logger, config)?;
    }

    let handle = logger.start().context("start logger")?;
    let _ = HANDLE.set(handle);
    Ok(())
}

/// Routes output to `logger.path`; warnings and errors still reach stderr.
fn to_file(logger: FlexiLogger, config: &Logger) -> Result<FlexiLogger> {
    let file_spec = FileSpec::try_from(Path::new(&config.path)).context("logger.path")?;
    let mut logger = logger
        .log_to_file(file_spec)
        .duplicate_to_stderr(Duplicate::Warn)
        .format(format_line);
    if config.max_size > 0 {
        let cleanup = match config.max_backups {
            0 => Cleanup::Never,
            n => Cleanup::KeepLogFiles(n as usize),
        };
        logger = logger.rotate(Criterion::Size(config.max_size * MIB), Naming::Numbers, cleanup);
    }
    Ok(logger.write_mode(WriteMode::BufferAndFlush))
}

/// Flushes buffered file output. Called before a fatal exit.
pub fn flush() {
    match HANDLE.get() {
        Some(handle) => handle.flush(),
        None => log::logger().flush(),
    }
}

fn parse_level(raw: &str) -> LevelFilter {
    match raw.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn format_line(writer: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    let columns = COLUMNS.get().copied().unwrap_or(DEFAULT_COLUMNS);
    write!(writer, "{} [{}]", now.now_utc_owned().format(TIMESTAMP_FORMAT), record.level())?;
    if columns.pid {
        write!(writer, " pid={}", std::process::id())?;
    }
    if columns.trace_id {
        let trace_id = TRACE_ID.try_with(String::clone).unwrap_or_else(|_| "-".to_string());
        write!(writer, " trace_id={trace_id}")?;
    }
    if columns.caller {
        write!(writer, " {}:{}", record.file().unwrap_or("-"), record.line().unwrap_or(0))?;
    }
    write!(writer, " {}", record.args())
}

/// Runs `fut` with `trace_id` attached to every log line it emits.
pub async fn with_trace_id<T>(trace_id: String, fut: impl std::future::Future<Output = T>) -> T {
    TRACE_ID.scope(trace_id, fut).await
}
