//! SSH transport built on `openssh` with `scp` uploads.

use super::retry::{ConnectRetryPolicy, run_with_retry};
use super::{Transport, parse_platform_probe};
use crate::errors::TransportError;
use crate::types::{CommandOutput, Platform, Protocol, TargetSpec};
use crate::util::mask_sensitive_command;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const POSIX_PROBE: &str = concat!(
    "uname -s; uname -m; case \"$(uname -s)\" in ",
    "Darwin) sw_vers -productVersion ;; ",
    "AIX) oslevel ;; ",
    "*) (. /etc/os-release && echo \"$ID $VERSION_ID\") 2>/dev/null || uname -r ;; ",
    "esac"
);
const WINDOWS_PROBE: &str = "cmd /c ver";

/// Host key checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KnownHostsPolicy {
    Strict,
    /// Add unknown hosts, reject changed keys.
    #[default]
    Add,
    Accept,
}

impl KnownHostsPolicy {
    fn scp_option(self) -> &'static str {
        match self {
            Self::Strict => "StrictHostKeyChecking=yes",
            Self::Add => "StrictHostKeyChecking=accept-new",
            Self::Accept => "StrictHostKeyChecking=no",
        }
    }
}

impl From<KnownHostsPolicy> for KnownHosts {
    fn from(policy: KnownHostsPolicy) -> Self {
        match policy {
            KnownHostsPolicy::Strict => KnownHosts::Strict,
            KnownHostsPolicy::Add => KnownHosts::Add,
            KnownHostsPolicy::Accept => KnownHosts::Accept,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub known_hosts: KnownHostsPolicy,
    pub retry: ConnectRetryPolicy,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            known_hosts: KnownHostsPolicy::Add,
            retry: ConnectRetryPolicy::default(),
        }
    }
}

/// A command ready to hand to the remote shell, plus optional stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedCommand {
    pub command: String,
    pub stdin: Option<String>,
}

pub struct SshTransport {
    spec: TargetSpec,
    options: SshOptions,
    session: Option<Session>,
    windows: bool,
}

impl SshTransport {
    pub fn new(spec: TargetSpec, options: SshOptions) -> Self {
        Self {
            spec,
            options,
            session: None,
            windows: false,
        }
    }

    fn use_sudo(&self) -> bool {
        self.spec.sudo && !self.windows && self.spec.effective_user() != "root"
    }

    fn wrap(&self, command: &str) -> WrappedCommand {
        if self.windows {
            WrappedCommand {
                command: wrap_powershell(command),
                stdin: None,
            }
        } else if self.use_sudo() {
            wrap_sudo(
                command,
                self.spec.sudo_command(),
                self.spec.sudo_password.as_deref(),
            )
        } else {
            WrappedCommand {
                command: command.to_string(),
                stdin: None,
            }
        }
    }

    async fn open_session(&self) -> Result<Session, TransportError> {
        let mut builder = SessionBuilder::default();
        builder
            .user(self.spec.effective_user().to_string())
            .port(self.spec.effective_port())
            .connect_timeout(self.options.connect_timeout)
            .known_hosts_check(self.options.known_hosts.into());
        if let Some(key) = &self.spec.identity_file {
            builder.keyfile(key);
        }
        builder
            .connect(&self.spec.host)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))
    }

    async fn exec(
        session: &Session,
        wrapped: &WrappedCommand,
    ) -> Result<CommandOutput, TransportError> {
        let output = match &wrapped.stdin {
            None => session
                .raw_command(&wrapped.command)
                .output()
                .await
                .map_err(|e| TransportError::Exec(e.to_string()))?,
            Some(input) => {
                let mut child = session
                    .raw_command(&wrapped.command)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .await
                    .map_err(|e| TransportError::Exec(e.to_string()))?;
                if let Some(mut stdin) = child.stdin().take() {
                    stdin.write_all(input.as_bytes()).await?;
                    stdin.shutdown().await?;
                }
                child
                    .wait_with_output()
                    .await
                    .map_err(|e| TransportError::Exec(e.to_string()))?
            }
        };

        Ok(CommandOutput::new(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ))
    }

    async fn detect_platform(session: &Session) -> Result<Platform, TransportError> {
        let raw = |command: &str| WrappedCommand {
            command: command.to_string(),
            stdin: None,
        };

        let posix = Self::exec(session, &raw(POSIX_PROBE)).await?;
        if posix.success()
            && let Some(platform) = parse_platform_probe(&posix.stdout)
        {
            return Ok(platform);
        }

        let windows = Self::exec(session, &raw(WINDOWS_PROBE)).await?;
        parse_platform_probe(&windows.stdout).ok_or_else(|| {
            TransportError::Connect(format!(
                "unable to detect remote platform: {}",
                posix.diagnostic_output().trim()
            ))
        })
    }

    /// Fail fast on sudo misconfiguration so the error carries sudo's text.
    async fn verify_sudo(&self, session: &Session) -> Result<(), TransportError> {
        let probe = self.wrap("true");
        let output = Self::exec(session, &probe).await?;
        if output.success() {
            Ok(())
        } else {
            Err(TransportError::Connect(
                output.diagnostic_output().trim().to_string(),
            ))
        }
    }
}

impl Transport for SshTransport {
    async fn connect(&mut self) -> Result<Platform, TransportError> {
        if self.spec.protocol != Protocol::Ssh {
            return Err(TransportError::UnsupportedProtocol(self.spec.protocol));
        }

        let host = self.spec.host.clone();
        debug!(host = %host, user = %self.spec.effective_user(), "Opening SSH session");
        let session =
            run_with_retry("ssh connect", &self.options.retry, || self.open_session()).await?;

        let platform = Self::detect_platform(&session).await?;
        self.windows = platform.os_family().is_windows();

        if self.use_sudo() {
            self.verify_sudo(&session).await?;
        }

        info!(
            host = %host,
            family = %platform.family,
            name = %platform.name,
            release = %platform.release,
            "Connected"
        );
        self.session = Some(session);
        Ok(platform)
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, TransportError> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        debug!(
            host = %self.spec.host,
            command = %mask_sensitive_command(command),
            "Running remote command"
        );
        let wrapped = self.wrap(command);
        let output = Self::exec(session, &wrapped).await?;
        debug!(host = %self.spec.host, exit_status = output.exit_status, "Remote command finished");
        Ok(output)
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransportError> {
        if self.session.is_none() {
            return Err(TransportError::NotConnected);
        }

        let destination = format!(
            "{}@{}:{}",
            self.spec.effective_user(),
            self.spec.host,
            remote_path
        );
        let mut cmd = tokio::process::Command::new("scp");
        cmd.arg("-q")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg(self.options.known_hosts.scp_option())
            .arg("-P")
            .arg(self.spec.effective_port().to_string());
        if let Some(key) = &self.spec.identity_file {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(local).arg(&destination);

        debug!(
            host = %self.spec.host,
            local = %local.display(),
            remote = %remote_path,
            "Uploading file"
        );
        let output = cmd.output().await?;
        if output.status.success() {
            Ok(())
        } else {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(host = %self.spec.host, remote = %remote_path, error = %message, "Upload failed");
            Err(TransportError::Upload {
                local: local.to_path_buf(),
                remote: remote_path.to_string(),
                message,
            })
        }
    }
}

/// Wrap a POSIX command for sudo. With a password, sudo reads it from stdin.
pub fn wrap_sudo(command: &str, sudo_command: &str, password: Option<&str>) -> WrappedCommand {
    let escaped = shell_escape::unix::escape(Cow::Borrowed(command));
    match password {
        Some(password) => WrappedCommand {
            command: format!("{sudo_command} -S -p '' sh -c {escaped}"),
            stdin: Some(format!("{password}\n")),
        },
        None => WrappedCommand {
            command: format!("{sudo_command} -n sh -c {escaped}"),
            stdin: None,
        },
    }
}

/// Wrap a PowerShell script as an `-EncodedCommand` invocation.
pub fn wrap_powershell(script: &str) -> String {
    let utf16: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    format!(
        "powershell -NoProfile -NonInteractive -EncodedCommand {}",
        STANDARD.encode(utf16)
    )
}
