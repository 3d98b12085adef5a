//! Converge step: stage a policy archive on the target, run the agent
//! against it, and interpret the result.
//!
//! The remote temp directory is removed exactly once per run, whatever
//! the agent's exit status. On failure the remote run report is fetched,
//! removed, and mapped to a [`ConvergeFailure`](crate::errors::ConvergeFailure).

pub mod failure_mapper;
pub mod workstation_config;

pub use failure_mapper::{failure_from_report, map_exception};
pub use workstation_config::{
    REPORT_HANDLER_NAME, REPORT_HANDLER_SOURCE, WORKSTATION_CONFIG_NAME, render_workstation_config,
};

use crate::action::{Action, ActionEvent, Notifier};
use crate::config::ApplyConfig;
use crate::errors::{ApplyError, Result, TransportError};
use crate::target::{LinuxCapabilities, RemoteCapabilities, RemoteTarget, WindowsCapabilities};
use crate::transport::Transport;
use crate::types::OsFamily;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

/// Agent exit status meaning the run succeeded and scheduled a reboot.
pub const EXIT_REBOOT_SCHEDULED: i32 = 35;

const AGENT_BINARY: &str = "chef-client";
const TRUSTED_CERTS_DIR: &str = "trusted_certs";

/// Build the agent invocation for a staged run directory.
///
/// POSIX targets run under `bash -c` so the working directory can change.
/// Windows waits on `Out-Null` and leaves the directory before exiting so
/// it can be removed afterwards.
pub fn run_agent_command(os: OsFamily, dir: &str, config_file: &str, archive: &str) -> String {
    if os.is_windows() {
        let config = WindowsCapabilities.join_path(dir, config_file);
        let archive = WindowsCapabilities.join_path(dir, archive);
        format!(
            "Set-Location -Path {dir}; {AGENT_BINARY} -z --config {config} --recipe-url {archive} | Out-Null; Set-Location C:/; exit $LASTEXITCODE"
        )
    } else {
        let config = LinuxCapabilities.join_path(dir, config_file);
        let archive = LinuxCapabilities.join_path(dir, archive);
        format!("bash -c 'cd {dir}; {AGENT_BINARY} -z --config {config} --recipe-url {archive}'")
    }
}

/// Local `*.crt` and `*.pem` files in `dir`, sorted. A missing directory
/// has no certificates.
pub fn find_trusted_certs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ApplyError::local_io(
                format!("reading trusted certs from {}", dir.display()),
                e,
            ));
        }
    };

    let mut certs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "crt" || ext == "pem")
        })
        .collect();
    certs.sort();
    Ok(certs)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Write `contents` to a scratch file that is removed when dropped.
fn scratch_file(contents: &str) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

pub struct ConvergeWorkflow<'a, T: Transport> {
    target: &'a mut RemoteTarget<T>,
    config: &'a ApplyConfig,
    local_policy_path: PathBuf,
}

impl<'a, T: Transport> ConvergeWorkflow<'a, T> {
    pub fn new(
        target: &'a mut RemoteTarget<T>,
        config: &'a ApplyConfig,
        local_policy_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target,
            config,
            local_policy_path: local_policy_path.into(),
        }
    }

    pub fn local_policy_path(&self) -> &Path {
        &self.local_policy_path
    }

    /// Upload everything the run needs. Returns the remote archive name.
    async fn stage(&self, dir: &str, notifier: &Notifier<'_>) -> Result<String> {
        let archive = self.create_remote_policy(dir, notifier).await?;
        self.create_remote_config(dir).await?;
        self.create_remote_handler(dir).await?;
        self.upload_trusted_certs(dir, notifier).await?;
        Ok(archive)
    }

    async fn create_remote_policy(&self, dir: &str, notifier: &Notifier<'_>) -> Result<String> {
        let archive = file_name(&self.local_policy_path);
        let remote_path = self.target.join_path(dir, &archive)?;
        notifier.notify(ActionEvent::CreatingRemotePolicy);
        self.target
            .upload_file(&self.local_policy_path, &remote_path)
            .await
            .map_err(|e| {
                error!(host = %self.target.hostname(), error = %e, "Policy upload failed");
                ApplyError::PolicyUploadFailed(e)
            })?;
        Ok(archive)
    }

    async fn create_remote_config(&self, dir: &str) -> Result<()> {
        let cache_path = self.target.ws_cache_path()?;
        let rendered = render_workstation_config(cache_path, self.config);
        let remote_path = self.target.join_path(dir, WORKSTATION_CONFIG_NAME)?;
        self.upload_scratch(&rendered, &remote_path)
            .await
            .map_err(ApplyError::ConfigUploadFailed)
    }

    async fn create_remote_handler(&self, dir: &str) -> Result<()> {
        let remote_path = self.target.join_path(dir, REPORT_HANDLER_NAME)?;
        self.upload_scratch(REPORT_HANDLER_SOURCE, &remote_path)
            .await
            .map_err(ApplyError::HandlerUploadFailed)
    }

    async fn upload_scratch(
        &self,
        contents: &str,
        remote_path: &str,
    ) -> std::result::Result<(), TransportError> {
        let scratch = scratch_file(contents)?;
        self.target.upload_file(scratch.path(), remote_path).await
    }

    async fn upload_trusted_certs(&self, dir: &str, notifier: &Notifier<'_>) -> Result<()> {
        let Some(local_dir) = &self.config.agent.trusted_certs_dir else {
            return Ok(());
        };
        let certs = find_trusted_certs(local_dir)?;
        if certs.is_empty() {
            return Ok(());
        }

        notifier.notify(ActionEvent::UploadingTrustedCerts);
        let remote_dir = format!("{dir}/{TRUSTED_CERTS_DIR}");
        self.target.make_directory(&remote_dir).await?;
        for cert in certs {
            let remote_path = format!("{remote_dir}/{}", file_name(&cert));
            self.target
                .upload_file(&cert, &remote_path)
                .await
                .map_err(|source| ApplyError::TrustedCertUploadFailed {
                    cert: cert.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn handle_failed_run(&self) -> ApplyError {
        let host = self.target.hostname().to_string();
        let report_path = match self.target.run_report_path() {
            Ok(path) => path,
            Err(e) => return e,
        };

        let content = match self.target.fetch_file_contents(&report_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(host = %host, error = %e, "Could not fetch run report");
                None
            }
        };

        match &content {
            None => error!(host = %host, path = %report_path, "Could not read remote report"),
            Some(_) => {
                // A later run that fails before writing a report must not see this one.
                if let Err(e) = self.target.delete_file(&report_path).await {
                    warn!(host = %host, error = %e, "Could not remove remote run report");
                }
            }
        }

        let err = failure_from_report(&host, &report_path, content.as_deref());
        error!(host = %host, error = %err, "Remote converge failed");
        err
    }
}

impl<T: Transport> Action for ConvergeWorkflow<'_, T> {
    fn name(&self) -> &'static str {
        "converge"
    }

    async fn perform(&mut self, notifier: &Notifier<'_>) -> Result<()> {
        let remote_tmp = self.target.make_temp_dir().await?;
        let dir = self.target.normalize_path(&remote_tmp)?;

        let archive = match self.stage(&dir, notifier).await {
            Ok(archive) => archive,
            Err(e) => {
                if let Err(cleanup) = self.target.delete_directory(&dir).await {
                    warn!(
                        host = %self.target.hostname(),
                        error = %cleanup,
                        "Could not remove remote temp dir"
                    );
                }
                return Err(e);
            }
        };

        notifier.notify(ActionEvent::RunningChef);
        let command = run_agent_command(
            self.target.os_family(),
            &dir,
            WORKSTATION_CONFIG_NAME,
            &archive,
        );
        let run = self.target.run_command(&command).await;

        let cleanup = self.target.delete_directory(&dir).await;
        let output = match (run, cleanup) {
            (Err(e), cleanup) => {
                if let Err(cleanup) = cleanup {
                    warn!(
                        host = %self.target.hostname(),
                        error = %cleanup,
                        "Could not remove remote temp dir"
                    );
                }
                return Err(e);
            }
            (Ok(_), Err(cleanup)) => return Err(cleanup),
            (Ok(output), Ok(())) => output,
        };

        match output.exit_status {
            0 => {
                info!(host = %self.target.hostname(), "Converge succeeded");
                debug!(stdout = %output.stdout, "Agent output");
                notifier.notify(ActionEvent::Success);
                Ok(())
            }
            EXIT_REBOOT_SCHEDULED => {
                info!(host = %self.target.hostname(), "Converge succeeded, reboot scheduled");
                notifier.notify(ActionEvent::Reboot);
                Ok(())
            }
            status => {
                notifier.notify(ActionEvent::ConvergeError);
                error!(
                    host = %self.target.hostname(),
                    exit_status = status,
                    command = %command,
                    stdout = %output.stdout,
                    stderr = %output.stderr,
                    "Agent run failed"
                );
                Err(self.handle_failed_run().await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_run_command_literal() {
        assert_eq!(
            run_agent_command(OsFamily::Windows, "C:\\w", "workstation.rb", "a.tgz"),
            "Set-Location -Path C:\\w; chef-client -z --config C:\\w\\workstation.rb --recipe-url C:\\w\\a.tgz | Out-Null; Set-Location C:/; exit $LASTEXITCODE"
        );
    }

    #[test]
    fn test_posix_run_command_literal() {
        for os in [OsFamily::Linux, OsFamily::Macos, OsFamily::Solaris, OsFamily::Aix] {
            assert_eq!(
                run_agent_command(os, "/tmp/chef_abc", "workstation.rb", "policy.tgz"),
                "bash -c 'cd /tmp/chef_abc; chef-client -z --config /tmp/chef_abc/workstation.rb --recipe-url /tmp/chef_abc/policy.tgz'"
            );
        }
    }

    #[test]
    fn test_find_trusted_certs_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pem", "a.crt", "notes.txt", "key.pem.bak"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.crt")).unwrap();

        let certs = find_trusted_certs(dir.path()).unwrap();
        let names: Vec<_> = certs.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.crt", "b.pem"]);
    }

    #[test]
    fn test_find_trusted_certs_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_trusted_certs(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_scratch_file_is_removed_on_drop() {
        let scratch = scratch_file("local_mode true\n").unwrap();
        let path = scratch.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "local_mode true\n");
        drop(scratch);
        assert!(!path.exists());
    }
}
