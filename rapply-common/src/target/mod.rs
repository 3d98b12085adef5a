//! A connected remote machine.
//!
//! [`RemoteTarget`] owns one transport session and, once the OS is known,
//! the matching [`RemoteCapabilities`]. No remote operation runs before
//! both are in place.

pub mod capabilities;

pub use capabilities::{
    AixCapabilities, LinuxCapabilities, MacOsCapabilities, RemoteCapabilities,
    SolarisCapabilities, WindowsCapabilities, capabilities_for,
};

use crate::errors::{ApplyError, ConnectionFailureReason, Result, TransportError};
use crate::transport::Transport;
use crate::types::{CommandOutput, OsFamily, Platform, TargetSpec};
use crate::util::mask_sensitive_command;
use crate::version_gate::AgentVersion;
use std::path::Path;
use tracing::{debug, info, warn};

pub struct RemoteTarget<T: Transport> {
    spec: TargetSpec,
    transport: T,
    platform: Option<Platform>,
    capabilities: Option<Box<dyn RemoteCapabilities>>,
    temp_dir: Option<String>,
    installed_version: Option<AgentVersion>,
}

impl<T: Transport> RemoteTarget<T> {
    pub fn new(spec: TargetSpec, transport: T) -> Self {
        Self {
            spec,
            transport,
            platform: None,
            capabilities: None,
            temp_dir: None,
            installed_version: None,
        }
    }

    pub fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    pub fn hostname(&self) -> &str {
        &self.spec.host
    }

    /// User the session authenticates as.
    pub fn user(&self) -> &str {
        self.spec.effective_user()
    }

    pub fn platform(&self) -> Option<&Platform> {
        self.platform.as_ref()
    }

    pub fn os_family(&self) -> OsFamily {
        self.platform
            .as_ref()
            .map(Platform::os_family)
            .unwrap_or(OsFamily::Unknown)
    }

    pub fn is_connected(&self) -> bool {
        self.capabilities.is_some()
    }

    /// Connect and bind capabilities. A second call is a no-op.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            debug!(host = %self.spec.host, "Already connected");
            return Ok(());
        }

        if self.platform.is_none() {
            let platform = self
                .transport
                .connect()
                .await
                .map_err(|e| connection_error(&self.spec.host, e))?;
            self.platform = Some(platform);
        }

        self.resolve_capabilities()
    }

    fn resolve_capabilities(&mut self) -> Result<()> {
        let Some(platform) = &self.platform else {
            return Err(ApplyError::NotConnected {
                host: self.spec.host.clone(),
            });
        };
        let capabilities = capabilities_for(platform.os_family()).ok_or_else(|| {
            ApplyError::UnsupportedTargetOs {
                host: self.spec.host.clone(),
                family: platform.family.clone(),
            }
        })?;
        info!(host = %self.spec.host, os = %capabilities.os_family(), "Bound target capabilities");
        self.capabilities = Some(capabilities);
        Ok(())
    }

    pub fn capabilities(&self) -> Result<&dyn RemoteCapabilities> {
        self.capabilities
            .as_deref()
            .ok_or_else(|| ApplyError::NotConnected {
                host: self.spec.host.clone(),
            })
    }

    pub async fn run_command(&self, command: &str) -> Result<CommandOutput> {
        self.capabilities()?;
        self.transport
            .run_command(command)
            .await
            .map_err(|source| ApplyError::Transport {
                host: self.spec.host.clone(),
                source,
            })
    }

    /// Run a command and fail on a non-zero exit.
    pub async fn run_command_or_fail(&self, command: &str) -> Result<CommandOutput> {
        let output = self.run_command(command).await?;
        if output.success() {
            Ok(output)
        } else {
            warn!(
                host = %self.spec.host,
                exit_status = output.exit_status,
                command = %mask_sensitive_command(command),
                "Remote command failed"
            );
            Err(ApplyError::RemoteExecutionFailed {
                host: self.spec.host.clone(),
                command: mask_sensitive_command(command),
                exit_status: output.exit_status,
                output: output.diagnostic_output().trim().to_string(),
            })
        }
    }

    /// Upload a local file. Returns the transport error so callers can wrap
    /// it in the step-specific failure.
    pub async fn upload_file(
        &self,
        local: &Path,
        remote_path: &str,
    ) -> std::result::Result<(), TransportError> {
        if self.capabilities.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.transport.upload(local, remote_path).await
    }

    /// Contents of a remote file, or `None` when it is absent.
    pub async fn fetch_file_contents(&self, path: &str) -> Result<Option<String>> {
        let command = self.capabilities()?.read_file(path);
        let output = self.run_command(&command).await?;
        Ok(output.success().then_some(output.stdout))
    }

    /// Create a directory owned by the connecting user.
    pub async fn make_directory(&self, path: &str) -> Result<String> {
        let caps = self.capabilities()?;
        self.run_command_or_fail(&caps.make_directory(path)).await?;
        if let Some(chown) = caps.chown(path, self.user()) {
            self.run_command_or_fail(&chown).await?;
        }
        Ok(path.to_string())
    }

    /// The temp directory for this connection, created on first use.
    pub async fn make_temp_dir(&mut self) -> Result<String> {
        if let Some(dir) = &self.temp_dir {
            return Ok(dir.clone());
        }

        let caps = self.capabilities()?;
        let command = caps.make_temp_dir();
        let output = self.run_command_or_fail(&command).await?;
        let dir = output.stdout.trim().to_string();
        if dir.is_empty() {
            return Err(ApplyError::RemoteExecutionFailed {
                host: self.spec.host.clone(),
                command,
                exit_status: output.exit_status,
                output: "no directory path returned".to_string(),
            });
        }
        if let Some(chown) = caps.chown(&dir, self.user()) {
            self.run_command_or_fail(&chown).await?;
        }

        debug!(host = %self.spec.host, dir = %dir, "Created remote temp dir");
        self.temp_dir = Some(dir.clone());
        Ok(dir)
    }

    pub async fn install_package(&self, remote_path: &str) -> Result<()> {
        let command = self.capabilities()?.install_package(remote_path)?;
        self.run_command_or_fail(&command).await?;
        Ok(())
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let command = self.capabilities()?.delete_file(path);
        self.run_command_or_fail(&command).await?;
        Ok(())
    }

    /// Remove a directory tree. Removing the cached temp dir clears the cache.
    pub async fn delete_directory(&mut self, path: &str) -> Result<()> {
        let command = self.capabilities()?.delete_directory(path);
        self.run_command_or_fail(&command).await?;
        if self.temp_dir.as_deref() == Some(path)
            || self
                .temp_dir
                .as_deref()
                .is_some_and(|dir| self.normalize_path(dir).ok().as_deref() == Some(path))
        {
            self.temp_dir = None;
        }
        Ok(())
    }

    pub fn normalize_path(&self, path: &str) -> Result<String> {
        Ok(self.capabilities()?.normalize_path(path))
    }

    pub fn join_path(&self, base: &str, name: &str) -> Result<String> {
        Ok(self.capabilities()?.join_path(base, name))
    }

    pub fn ws_cache_path(&self) -> Result<&'static str> {
        Ok(self.capabilities()?.ws_cache_path())
    }

    /// Fixed location of the structured report written by a failed run.
    pub fn run_report_path(&self) -> Result<String> {
        let caps = self.capabilities()?;
        Ok(caps.normalize_path(&format!("{}/cache/run-report.json", caps.ws_cache_path())))
    }

    /// Installed agent version, read once per connection from the manifest.
    pub async fn installed_agent_version(&mut self) -> Result<AgentVersion> {
        if let Some(version) = self.installed_version {
            return Ok(version);
        }

        let path = self.capabilities()?.version_manifest_path();
        let contents = self
            .fetch_file_contents(path)
            .await?
            .ok_or_else(|| ApplyError::AgentNotInstalled {
                host: self.spec.host.clone(),
            })?;
        let version = parse_version_manifest(path, &contents)?;
        debug!(host = %self.spec.host, version = %version, "Detected installed agent");
        self.installed_version = Some(version);
        Ok(version)
    }

    /// Forget the cached agent version after an install.
    pub fn clear_installed_version(&mut self) {
        self.installed_version = None;
    }
}

fn connection_error(host: &str, error: TransportError) -> ApplyError {
    match error {
        TransportError::UnsupportedProtocol(_) => ApplyError::Transport {
            host: host.to_string(),
            source: error,
        },
        other => {
            let message = other.to_string();
            ApplyError::Connection {
                host: host.to_string(),
                reason: ConnectionFailureReason::classify(&message),
                message,
            }
        }
    }
}

/// Extract `build_version` from a version manifest.
pub fn parse_version_manifest(path: &str, contents: &str) -> Result<AgentVersion> {
    let invalid = |message: String| ApplyError::InvalidVersionManifest {
        path: path.to_string(),
        message,
    };
    let manifest: serde_json::Value =
        serde_json::from_str(contents).map_err(|e| invalid(e.to_string()))?;
    let build_version = manifest
        .get("build_version")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| invalid("missing build_version".to_string()))?;
    build_version.parse::<AgentVersion>().map_err(invalid)
}
