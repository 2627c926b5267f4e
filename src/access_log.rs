use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;

/// One line per request, rotated by the minute stamp when writing to a file.
#[derive(Debug)]
pub struct AccessLogger {
    writer: Mutex<AccessWriter>,
    path: Option<PathBuf>,
    last_stamp: Mutex<Option<String>>,
}

#[derive(Debug)]
enum AccessWriter {
    File(std::fs::File),
    Stdout(std::io::Stdout),
}

#[derive(Debug, Default)]
pub struct AccessRecord<'a> {
    pub client_ip: &'a str,
    pub host: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
    pub status: u16,
    pub content_type: &'a str,
    pub body_len: u64,
    pub duration_ms: u128,
    pub referer: &'a str,
    pub user_agent: &'a str,
    pub cachify_status: &'a str,
    pub request_id: &'a str,
}

impl AccessRecord<'_> {
    pub fn format_line(&self) -> String {
        let fields = [
            field(self.client_ip),
            field(self.host),
            field(&format_access_time()),
            field_replace(&format!("{} {}", self.method, self.uri)),
            self.status.to_string(),
            field_replace(self.content_type),
            self.body_len.to_string(),
            self.duration_ms.to_string(),
            field_replace(self.referer),
            field_replace(self.user_agent),
            field(self.cachify_status),
            field(self.request_id),
        ];
        format!("{}\n", fields.join(" "))
    }
}

impl AccessLogger {
    pub fn new(path: Option<&str>) -> Result<Self> {
        let (writer, path) = match path.filter(|p| !p.is_empty()) {
            Some(path) => {
                let path = Path::new(path);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create access log dir {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("open access log {}", path.display()))?;
                (AccessWriter::File(file), Some(path.to_path_buf()))
            }
            None => (AccessWriter::Stdout(std::io::stdout()), None),
        };
        Ok(Self {
            writer: Mutex::new(writer),
            path,
            last_stamp: Mutex::new(None),
        })
    }

    pub fn log(&self, record: &AccessRecord<'_>) {
        self.log_line(&record.format_line());
    }

    fn log_line(&self, line: &str) {
        self.rotate_if_needed();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = match &mut *writer {
                AccessWriter::File(file) => file.write_all(line.as_bytes()),
                AccessWriter::Stdout(stdout) => stdout.write_all(line.as_bytes()),
            };
        }
    }

    fn rotate_if_needed(&self) {
        let Some(path) = &self.path else { return };
        let stamp = Local::now().format("%Y%m%d%H%M").to_string();
        let Ok(mut last) = self.last_stamp.lock() else { return };
        match last.as_ref() {
            Some(prev) if *prev == stamp => return,
            // First write since start: keep appending to the current file.
            None => {
                *last = Some(stamp);
                return;
            }
            Some(_) => {}
        }
        let rotated = PathBuf::from(format!("{}.{}", path.display(), stamp));
        let _ = fs::rename(path, rotated);
        if let Ok(mut writer) = self.writer.lock() {
            if let Ok(file) = OpenOptions::new().create(true).append(true).open(path) {
                *writer = AccessWriter::File(file);
                *last = Some(stamp);
            }
        }
    }
}

fn field(s: &str) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s.to_string()
    }
}

fn field_replace(s: &str) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s.replace(' ', "+")
    }
}

fn format_access_time() -> String {
    Local::now().format("[%d/%b/%Y:%H:%M:%S %z]").to_string()
}
