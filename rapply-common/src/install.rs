//! Agent install step.
//!
//! Checks the installed agent against the version gate and, when needed,
//! downloads the package for the target platform, uploads it into the
//! target's temp directory and installs it.

use crate::action::{Action, ActionEvent, Notifier};
use crate::artifact::{ArtifactInfo, ArtifactSource};
use crate::errors::{ApplyError, Result};
use crate::target::RemoteTarget;
use crate::transport::Transport;
use crate::util::basename;
use crate::version_gate::{self, AgentVersion, InstallDecision};
use tracing::{debug, info};

pub struct InstallWorkflow<'a, T: Transport, S: ArtifactSource> {
    target: &'a mut RemoteTarget<T>,
    source: &'a S,
    check_only: bool,
    upgrade_from: Option<AgentVersion>,
    artifact: Option<ArtifactInfo>,
}

impl<'a, T: Transport, S: ArtifactSource> InstallWorkflow<'a, T, S> {
    pub fn new(target: &'a mut RemoteTarget<T>, source: &'a S) -> Self {
        Self {
            target,
            source,
            check_only: false,
            upgrade_from: None,
            artifact: None,
        }
    }

    /// Fail instead of installing when the agent is missing or too old.
    pub fn check_only(mut self, check_only: bool) -> Self {
        self.check_only = check_only;
        self
    }

    /// Whether the last run replaced an outdated agent.
    pub fn upgrading(&self) -> bool {
        self.upgrade_from.is_some()
    }

    pub fn upgrade_from(&self) -> Option<AgentVersion> {
        self.upgrade_from
    }

    /// Version of the resolved package, once lookup has run.
    pub fn version_to_install(&self) -> Option<&str> {
        self.artifact.as_ref().map(|a| a.version.as_str())
    }

    async fn installed_version(&mut self) -> Result<Option<AgentVersion>> {
        match self.target.installed_agent_version().await {
            Ok(version) => Ok(Some(version)),
            Err(ApplyError::AgentNotInstalled { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upload_artifact(&mut self, local: &std::path::Path, url: &str) -> Result<String> {
        let dir = self.target.make_temp_dir().await?;
        let remote_path = self.target.join_path(&dir, basename(url))?;
        self.target
            .upload_file(local, &remote_path)
            .await
            .map_err(ApplyError::ArtifactUploadFailed)?;
        Ok(remote_path)
    }
}

impl<T: Transport, S: ArtifactSource> Action for InstallWorkflow<'_, T, S> {
    fn name(&self) -> &'static str {
        "install"
    }

    async fn perform(&mut self, notifier: &Notifier<'_>) -> Result<()> {
        let installed = self.installed_version().await?;
        let decision = version_gate::evaluate(
            self.target.hostname(),
            installed,
            self.target.os_family(),
            self.check_only,
        )?;

        self.upgrade_from = match decision {
            InstallDecision::AlreadyCompatible(version) => {
                debug!(host = %self.target.hostname(), %version, "Agent already compatible");
                notifier.notify(ActionEvent::AlreadyInstalled { version });
                return Ok(());
            }
            InstallDecision::NotInstalled => None,
            InstallDecision::UpgradeRequired { current, .. } => Some(current),
        };

        let platform = self
            .target
            .platform()
            .cloned()
            .ok_or_else(|| ApplyError::NotConnected {
                host: self.target.hostname().to_string(),
            })?;

        notifier.notify(ActionEvent::Downloading);
        let artifact = self.source.resolve(&platform).await?;
        let version = artifact.version.clone();
        self.artifact = Some(artifact.clone());
        // Dropping `local` removes the download on every exit path.
        let local = self.source.fetch(&artifact).await?;

        notifier.notify(ActionEvent::Uploading);
        let remote_path = self.upload_artifact(local.path(), &artifact.url).await?;

        notifier.notify(ActionEvent::Installing {
            version: version.clone(),
            upgrade_from: self.upgrade_from,
        });
        self.target.install_package(&remote_path).await?;
        self.target.clear_installed_version();
        drop(local);

        info!(host = %self.target.hostname(), %version, "Agent installed");
        notifier.notify(ActionEvent::InstallComplete {
            version,
            upgrade_from: self.upgrade_from,
        });
        Ok(())
    }
}
