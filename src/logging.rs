//! tracing subscriber setup shared by both binaries.
//!
//! `RUST_LOG` wins over the configured level when set. with
//! `logging.file_suffix` set, everything printed to the console is also
//! appended to `<file_dir>/quillsecure_<YYYY_MM_DD>_<suffix>.log`.

use crate::config::LoggingConfig;
use anyhow::Context;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// install the global subscriber; returns the log file path when one is open
pub fn init(cfg: &LoggingConfig) -> anyhow::Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console: BoxedLayer = if cfg.pretty {
        fmt::layer().pretty().with_target(false).boxed()
    } else {
        fmt::layer().compact().with_target(false).boxed()
    };
    let mut layers = vec![console];

    let mut opened = None;
    if let Some(suffix) = cfg.file_suffix.as_deref().filter(|s| !s.is_empty()) {
        let (path, file) = open_log_file(&cfg.file_dir, suffix, chrono::Local::now().date_naive())?;
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
        opened = Some(path);
    }

    // try_init: tests and embedders may have installed a subscriber already
    let _ = tracing_subscriber::registry().with(layers).with(filter).try_init();
    Ok(opened)
}

pub fn log_file_name(suffix: &str, date: chrono::NaiveDate) -> String {
    format!("quillsecure_{}_{}.log", date.format("%Y_%m_%d"), suffix)
}

/// open (append, create) the dated log file
pub fn open_log_file(dir: &Path, suffix: &str, date: chrono::NaiveDate) -> anyhow::Result<(PathBuf, File)> {
    let path = dir.join(log_file_name(suffix, date));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok((path, file))
}
