//! Logging setup shared by the rapply binary and tests.

use crate::errors::{ApplyError, Result};
use std::path::PathBuf;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `rapply_common=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Append plain-text logs to this file.
    pub file: Option<PathBuf>,
    /// Console output goes to stderr instead of stdout.
    pub stderr: bool,
    /// Emit console output at all.
    pub console: bool,
}

impl LogConfig {
    /// Build from `RAPPLY_LOG` and `RAPPLY_LOG_FORMAT`, falling back to
    /// `default_level`.
    pub fn from_env(default_level: &str) -> Self {
        let level = std::env::var("RAPPLY_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default_level.to_string());
        let format = std::env::var("RAPPLY_LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        Self {
            level,
            format,
            file: None,
            stderr: false,
            console: true,
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn without_console(mut self) -> Self {
        self.console = false;
        self
    }
}

/// Keeps background log writers alive. Drop it last.
#[derive(Default)]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console = config.console.then(|| console_layer(config));

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir).map_err(|e| {
                ApplyError::local_io(format!("creating log directory {}", dir.display()), e)
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "rapply.log".to_string());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| ApplyError::local_io("installing log subscriber", std::io::Error::other(e)))?;

    Ok(LoggingGuards { _file: guard })
}

fn console_layer<S>(config: &LogConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match (config.format, config.stderr) {
        (LogFormat::Pretty, true) => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Pretty, false) => fmt::layer().with_target(false).boxed(),
        (LogFormat::Json, true) => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        (LogFormat::Json, false) => fmt::layer().json().boxed(),
    }
}
