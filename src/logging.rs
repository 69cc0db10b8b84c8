//! Tracing setup for the training binary and for applications embedding the
//! engine.
//!
//! A bare level such as `debug` applies to this crate's targets only, with
//! everything else at `warn`. A full `EnvFilter` directive is used verbatim.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_LOG_FILE: &str = "adaptive-practice.log";

/// Targets that a bare level applies to.
const CRATE_TARGETS: [&str; 2] = ["adaptive_practice", "train_bkt"];

/// Daily-rolling file output.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFile {
    pub dir: PathBuf,
    /// File name prefix; the appender adds the date suffix.
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
    pub file: Option<LogFile>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LogSettings {
    /// `LOG_LEVEL`, plus a file under `LOG_DIR` (default `./logs`) when
    /// `ENABLE_FILE_LOGS` is `true` or `1`.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let level = var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let file_enabled = var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let file = file_enabled.then(|| LogFile {
            dir: PathBuf::from(var("LOG_DIR").unwrap_or_else(|| "./logs".to_string())),
            file_name: DEFAULT_LOG_FILE.to_string(),
        });
        Self { level, file }
    }

    pub fn with_file(mut self, dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        self.file = Some(LogFile {
            dir: dir.into(),
            file_name: file_name.into(),
        });
        self
    }
}

/// Keeps the non-blocking file writer alive; drop it only at shutdown.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

fn filter_directive(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    let mut directive = String::from("warn");
    for target in CRATE_TARGETS {
        directive.push_str(&format!(",{target}={level}"));
    }
    directive
}

/// Install the global subscriber. Later calls are ignored, so tests and
/// embedding applications may call it freely.
pub fn init_tracing(settings: &LogSettings) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(filter_directive(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new(filter_directive("info")));
    let stdout_layer = fmt::layer().with_target(true);

    let file = settings.file.as_ref().and_then(|file| {
        match std::fs::create_dir_all(&file.dir) {
            Ok(()) => {
                let appender = RollingFileAppender::new(Rotation::DAILY, &file.dir, &file.file_name);
                Some(tracing_appender::non_blocking(appender))
            }
            Err(err) => {
                eprintln!("file logging disabled, cannot create {}: {err}", file.dir.display());
                None
            }
        }
    });

    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false).with_target(true)),
            Some(FileLogGuard { _guard: guard }),
        ),
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    guard
}
