//! 日志初始化：控制台输出，以及可选的会话日志与 latest 日志文件。

use chrono::Local;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LATEST_LOG_NAME, SESSION_LOG_FORMAT};

/// 单个日志文件输出端；写入失败只报告到 stderr，不影响请求。
#[derive(Clone)]
pub struct FileSink {
    label: Arc<str>,
    file: Arc<File>,
}

pub struct FileSinkWriter<'a> {
    label: &'a str,
    file: &'a File,
}

impl FileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            label: path.display().to_string().into(),
            file: Arc::new(file),
        })
    }
}

impl<'a> MakeWriter<'a> for FileSink {
    type Writer = FileSinkWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        FileSinkWriter {
            label: &self.label,
            file: &self.file,
        }
    }
}

impl Write for FileSinkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file;
        if let Err(err) = file.write_all(buf) {
            eprintln!("Failed to write to log file {}: {err}", self.label);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self.file;
        if let Err(err) = file.flush() {
            eprintln!("Failed to flush log file {}: {err}", self.label);
        }
        Ok(())
    }
}

/// 会话日志与 latest 日志的路径。
pub fn log_file_paths(log_dir: &Path) -> (PathBuf, PathBuf) {
    let session = format!("{}.txt", Local::now().format(SESSION_LOG_FORMAT));
    (log_dir.join(session), log_dir.join(LATEST_LOG_NAME))
}

/// 创建日志目录，截断 latest 日志并新建本次会话日志。
pub fn open_log_files(log_dir: &Path) -> io::Result<(FileSink, FileSink)> {
    fs::create_dir_all(log_dir)?;
    let (session_path, latest_path) = log_file_paths(log_dir);
    let latest = FileSink::create(&latest_path)?;
    let session = FileSink::create(&session_path)?;
    Ok((session, latest))
}

/// 初始化 tracing 日志订阅与默认过滤规则。
///
/// `log_dir` 为 `None` 时只输出到控制台；日志文件创建失败时同样退回控制台。
pub fn init_logging(log_dir: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (sinks, open_error) = match log_dir.map(open_log_files).transpose() {
        Ok(sinks) => (sinks, None),
        Err(err) => (None, Some(err)),
    };
    let (session_layer, latest_layer) = match sinks {
        Some((session, latest)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(session),
            ),
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(latest),
            ),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(session_layer)
        .with(latest_layer)
        .init();

    if let Some(err) = open_error {
        warn!(error = %err, "failed to open log files, logging to console only");
    }
}
