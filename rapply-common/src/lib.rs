//! Core library for rapply.
//!
//! Connects to remote targets, makes sure a compatible configuration agent
//! is installed, stages a policy archive, runs the agent against it and
//! reports the outcome. Multiple targets run concurrently, each isolated
//! from the others' failures.

pub mod action;
pub mod artifact;
pub mod config;
pub mod converge;
pub mod errors;
pub mod install;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod target;
pub mod testing;
pub mod transport;
pub mod types;
pub mod util;
pub mod version_gate;

pub use action::{Action, ActionEvent, ActionObserver, Notifier, run_action};
pub use artifact::{ArtifactInfo, ArtifactSource, LocalArtifact, OmnitruckSource, PackageQuery};
pub use config::ApplyConfig;
pub use converge::{ConvergeWorkflow, run_agent_command};
pub use errors::{
    ApplyError, ConnectionFailureReason, ConvergeFailure, ErrorCategory, ErrorCode, FailedJob,
    Result, TransportError,
};
pub use install::InstallWorkflow;
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use pipeline::{PipelineOptions, Reporter, converge_targets, run_target};
pub use scheduler::{Job, JobOutcome, JobScheduler};
pub use target::{RemoteCapabilities, RemoteTarget, capabilities_for};
pub use transport::Transport;
#[cfg(unix)]
pub use transport::{KnownHostsPolicy, SshOptions, SshTransport};
pub use types::{CommandOutput, OsFamily, Platform, Protocol, TargetSpec};
pub use version_gate::{AgentVersion, InstallDecision, MinimumVersions, VersionLine};
