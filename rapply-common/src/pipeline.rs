//! Per-target pipeline: connect, install, converge.
//!
//! [`run_target`] runs the steps strictly in order for one target and
//! turns action events into [`Reporter`] calls. [`converge_targets`]
//! builds one [`Job`] per target and hands them to the scheduler.

use crate::action::{ActionEvent, ActionObserver, run_action};
use crate::artifact::ArtifactSource;
use crate::config::ApplyConfig;
use crate::converge::ConvergeWorkflow;
use crate::errors::Result;
use crate::install::InstallWorkflow;
use crate::scheduler::{Job, JobOutcome, JobScheduler};
use crate::target::RemoteTarget;
use crate::transport::Transport;
use crate::types::TargetSpec;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, info_span};

/// Status sink for one target.
pub trait Reporter: Send + Sync {
    fn update(&self, message: &str);
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Local policy archive to converge.
    pub archive: PathBuf,
    /// Human-readable description of what the archive applies.
    pub descriptor: String,
    /// Install or upgrade the agent when needed. When false the run fails
    /// instead.
    pub install: bool,
}

impl PipelineOptions {
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        let archive = archive.into();
        let descriptor = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive.display().to_string());
        Self {
            archive,
            descriptor,
            install: true,
        }
    }

    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = descriptor.into();
        self
    }

    pub fn with_install(mut self, install: bool) -> Self {
        self.install = install;
        self
    }
}

/// Translates action events into reporter messages.
struct ReportingObserver<'a> {
    reporter: &'a dyn Reporter,
    descriptor: &'a str,
}

impl ActionObserver for ReportingObserver<'_> {
    fn on_event(&self, event: &ActionEvent) {
        let reporter = self.reporter;
        match event {
            ActionEvent::AlreadyInstalled { version } => {
                reporter.update(&format!("Agent {version} is already installed."))
            }
            ActionEvent::Downloading => reporter.update("Downloading the agent package."),
            ActionEvent::Uploading => reporter.update("Uploading the agent package to the target."),
            ActionEvent::Installing {
                version,
                upgrade_from: Some(from),
            } => reporter.update(&format!("Upgrading the agent from {from} to {version}.")),
            ActionEvent::Installing { version, .. } => {
                reporter.update(&format!("Installing agent {version}."))
            }
            ActionEvent::InstallComplete {
                version,
                upgrade_from: Some(_),
            } => reporter.update(&format!("Upgraded the agent to {version}.")),
            ActionEvent::InstallComplete { version, .. } => {
                reporter.update(&format!("Installed agent {version}."))
            }
            ActionEvent::CreatingRemotePolicy => {
                reporter.update("Creating the remote policy bundle.")
            }
            ActionEvent::UploadingTrustedCerts => {
                reporter.update("Uploading trusted certificates.")
            }
            ActionEvent::RunningChef => {
                reporter.update(&format!("Applying {}.", self.descriptor))
            }
            ActionEvent::Success => {
                reporter.success(&format!("Successfully converged {}.", self.descriptor))
            }
            ActionEvent::Reboot => reporter.success(&format!(
                "Converged {}. The target is rebooting.",
                self.descriptor
            )),
            // The `Error` event that follows finishes the line.
            ActionEvent::ConvergeError => {
                reporter.update(&format!("Failed to converge {}.", self.descriptor))
            }
            ActionEvent::Error { code, message } => {
                reporter.error(&format!("[{}] {message}", code.code_string()))
            }
        }
    }
}

/// Connect, install and converge one target, in that order.
pub async fn run_target<T: Transport, S: ArtifactSource>(
    target: &mut RemoteTarget<T>,
    source: &S,
    config: &ApplyConfig,
    options: &PipelineOptions,
    reporter: &dyn Reporter,
) -> Result<()> {
    reporter.update(&format!("Connecting as {}", target.user()));
    if let Err(e) = target.connect().await {
        reporter.error(&format!("[{}] {e}", e.code().code_string()));
        return Err(e);
    }
    reporter.update("Connected.");

    let observer = ReportingObserver {
        reporter,
        descriptor: &options.descriptor,
    };

    let mut install = InstallWorkflow::new(target, source).check_only(!options.install);
    run_action(&mut install, Some(&observer as &dyn ActionObserver)).await?;

    let mut converge = ConvergeWorkflow::new(target, config, options.archive.clone());
    run_action(&mut converge, Some(&observer as &dyn ActionObserver)).await
}

/// Run the full pipeline against every target concurrently.
pub async fn converge_targets<T, S, MT, MR>(
    specs: Vec<TargetSpec>,
    config: Arc<ApplyConfig>,
    source: Arc<S>,
    options: Arc<PipelineOptions>,
    make_transport: MT,
    make_reporter: MR,
) -> Result<Vec<JobOutcome>>
where
    T: Transport + 'static,
    S: ArtifactSource + 'static,
    MT: Fn(&TargetSpec) -> T,
    MR: Fn(&TargetSpec) -> Arc<dyn Reporter>,
{
    let jobs = specs
        .into_iter()
        .map(|spec| {
            let transport = make_transport(&spec);
            let reporter = make_reporter(&spec);
            let config = Arc::clone(&config);
            let source = Arc::clone(&source);
            let options = Arc::clone(&options);
            let span = info_span!("target", host = %spec.host);
            let prefix = spec.host.clone();
            Job::new(
                prefix,
                async move {
                    let mut target = RemoteTarget::new(spec, transport);
                    run_target(
                        &mut target,
                        source.as_ref(),
                        &config,
                        &options,
                        reporter.as_ref(),
                    )
                    .await
                }
                .instrument(span),
            )
        })
        .collect();

    JobScheduler::new().run(jobs).await
}
