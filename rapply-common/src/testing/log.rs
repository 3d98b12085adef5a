//! Structured test logging.
//!
//! Tests call [`init_global_test_logging`] to route tracing output to the
//! test writer plus `target/test-logs/all_tests.jsonl`, and use a
//! [`TestLogger`] to record per-test phases as JSONL.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Setup,
    Execute,
    Verify,
    Teardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Execute => write!(f, "execute"),
            Self::Verify => write!(f, "verify"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Install a global subscriber for tests. Safe to call more than once.
///
/// `RAPPLY_TEST_LOG_LEVEL` sets the level (default `info`) and
/// `RAPPLY_TEST_LOG_FILE` overrides the JSONL path.
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = create_global_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let level = std::env::var("RAPPLY_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter =
            tracing_subscriber::EnvFilter::try_new(format!("rapply={level},rapply_common={level}"))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_global_log_file() -> Option<std::fs::File> {
    if let Ok(custom_path) = std::env::var("RAPPLY_TEST_LOG_FILE") {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(&custom_path).ok();
    }

    let log_dir = test_log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("all_tests.jsonl")).ok()
}

fn test_log_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir).join("test-logs");
    }
    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target.join("test-logs");
        }
        if !cwd.pop() {
            return PathBuf::from("target/test-logs");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    pub timestamp: String,
    pub test_name: String,
    pub phase: TestPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub duration_ms: u64,
}

/// Per-test JSONL logger, written to `target/test-logs/<test>.jsonl`.
pub struct TestLogger {
    test_name: String,
    start_time: Instant,
    logs: Mutex<Vec<TestLogEntry>>,
    log_file: Option<Mutex<std::fs::File>>,
}

impl TestLogger {
    pub fn for_test(test_name: &str) -> Self {
        let safe_name = test_name.replace("::", "_").replace(['/', '\\'], "_");
        let log_dir = test_log_dir();
        let log_file = std::fs::create_dir_all(&log_dir)
            .and_then(|()| std::fs::File::create(log_dir.join(format!("{safe_name}.jsonl"))))
            .ok();

        let logger = Self {
            test_name: test_name.to_string(),
            start_time: Instant::now(),
            logs: Mutex::new(Vec::new()),
            log_file: log_file.map(Mutex::new),
        };
        logger.log(TestPhase::Setup, "TEST START");
        logger
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        self.write_entry(phase, message.into(), None);
    }

    pub fn log_with_data(
        &self,
        phase: TestPhase,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        self.write_entry(phase, message.into(), Some(data));
    }

    fn write_entry(&self, phase: TestPhase, message: String, data: Option<serde_json::Value>) {
        let entry = TestLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_name: self.test_name.clone(),
            phase,
            message,
            data,
            duration_ms: self.start_time.elapsed().as_millis() as u64,
        };

        if let Some(file) = &self.log_file
            && let Ok(mut f) = file.lock()
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let _ = writeln!(f, "{json}");
        }
        tracing::info!(test = %self.test_name, phase = %entry.phase, "{}", entry.message);

        if let Ok(mut logs) = self.logs.lock() {
            logs.push(entry);
        }
    }

    pub fn entries(&self) -> Vec<TestLogEntry> {
        self.logs.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn pass(self) {
        self.log(TestPhase::Verify, "TEST PASS");
    }
}
