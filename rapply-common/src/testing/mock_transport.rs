//! Scripted in-memory transport for tests.
//!
//! Commands are answered by the first matching substring rule, then by
//! built-in defaults (temp dir creation succeeds, file reads miss,
//! everything else exits 0). Every command, upload and connect attempt is
//! recorded in state shared with the [`MockHandle`].

use crate::errors::TransportError;
use crate::transport::Transport;
use crate::types::{CommandOutput, Platform};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const POSIX_RUN_REPORT: &str = "/var/chef-workstation/cache/run-report.json";
pub const WINDOWS_RUN_REPORT: &str = "C:/chef-workstation/cache/run-report.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub local: PathBuf,
    pub remote: String,
    /// File contents at upload time. Scratch files are gone afterwards.
    pub contents: Vec<u8>,
}

impl UploadRecord {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }
}

#[derive(Debug, Default)]
struct MockState {
    connects: usize,
    commands: Vec<String>,
    uploads: Vec<UploadRecord>,
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    output: CommandOutput,
}

#[derive(Debug, Clone)]
pub struct MockTransport {
    platform: Platform,
    connect_error: Option<String>,
    rules: Arc<Vec<Rule>>,
    failing_uploads: Arc<Vec<String>>,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::default()
    }

    /// Handle for inspecting recorded activity after the transport has
    /// been moved into a target.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    fn respond(&self, command: &str) -> CommandOutput {
        if let Some(rule) = self.rules.iter().find(|r| command.contains(&r.pattern)) {
            return rule.output.clone();
        }
        if command.contains("mktemp") {
            let id = uuid::Uuid::new_v4().simple().to_string();
            return CommandOutput::new(0, format!("/tmp/chef_{}\n", &id[..8]), "");
        }
        if command.contains("NewGuid") {
            let id = uuid::Uuid::new_v4();
            return CommandOutput::new(
                0,
                format!("C:\\Users\\admin\\AppData\\Local\\Temp\\{id}\r\n"),
                "",
            );
        }
        if command.contains("echo /tmp/chef-installer") {
            return CommandOutput::new(0, "/tmp/chef-installer\n", "");
        }
        if command.starts_with("test -f") || command.contains("Test-Path -PathType Leaf") {
            return CommandOutput::new(1, "", "");
        }
        CommandOutput::new(0, "", "")
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<Platform, TransportError> {
        self.state().connects += 1;
        match &self.connect_error {
            Some(message) => Err(TransportError::Connect(message.clone())),
            None => Ok(self.platform.clone()),
        }
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, TransportError> {
        self.state().commands.push(command.to_string());
        Ok(self.respond(command))
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
        if self.failing_uploads.iter().any(|p| remote_path.contains(p)) {
            return Err(TransportError::Upload {
                local: local.to_path_buf(),
                remote: remote_path.to_string(),
                message: "scp: permission denied".to_string(),
            });
        }
        let contents = tokio::fs::read(local).await.unwrap_or_default();
        self.state().uploads.push(UploadRecord {
            local: local.to_path_buf(),
            remote: remote_path.to_string(),
            contents,
        });
        Ok(())
    }
}

/// Read side of a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Number of recorded commands containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        lock(&self.state)
            .commands
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        lock(&self.state).uploads.clone()
    }

    /// The upload whose remote path ends with `suffix`.
    pub fn upload_ending_with(&self, suffix: &str) -> Option<UploadRecord> {
        lock(&self.state)
            .uploads
            .iter()
            .find(|u| u.remote.ends_with(suffix))
            .cloned()
    }
}

#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    platform: Platform,
    connect_error: Option<String>,
    rules: Vec<Rule>,
    failing_uploads: Vec<String>,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            platform: Platform::new("linux", "ubuntu", "22.04", "x86_64"),
            connect_error: None,
            rules: Vec::new(),
            failing_uploads: Vec::new(),
        }
    }
}

impl MockTransportBuilder {
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn windows(self) -> Self {
        self.platform(Platform::new("windows", "windows", "10.0.17763", "x86_64"))
    }

    /// Answer commands containing `pattern`. Earlier rules win.
    pub fn respond(mut self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.rules.push(Rule {
            pattern: pattern.into(),
            output,
        });
        self
    }

    /// Report `version` as the installed agent.
    pub fn installed_version(self, version: &str) -> Self {
        let manifest = format!(r#"{{"manifest_format":2,"build_version":"{version}"}}"#);
        self.respond("version-manifest.json", CommandOutput::new(0, manifest, ""))
    }

    /// Exit status of the agent run.
    pub fn converge_exit(self, exit_status: i32) -> Self {
        self.respond(
            " -z --config ",
            CommandOutput::new(exit_status, "", if exit_status == 0 { "" } else { "agent failed" }),
        )
    }

    /// Contents returned when the run report is read.
    pub fn run_report(self, contents: &str) -> Self {
        self.respond(
            format!("cat '{POSIX_RUN_REPORT}'"),
            CommandOutput::new(0, contents, ""),
        )
        .respond(
            format!("Get-Content -Raw '{WINDOWS_RUN_REPORT}'"),
            CommandOutput::new(0, contents, ""),
        )
    }

    pub fn fail_connect(mut self, message: impl Into<String>) -> Self {
        self.connect_error = Some(message.into());
        self
    }

    /// Fail uploads whose remote path contains `pattern`.
    pub fn fail_upload(mut self, pattern: impl Into<String>) -> Self {
        self.failing_uploads.push(pattern.into());
        self
    }

    pub fn build(self) -> MockTransport {
        MockTransport {
            platform: self.platform,
            connect_error: self.connect_error,
            rules: Arc::new(self.rules),
            failing_uploads: Arc::new(self.failing_uploads),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }
}
