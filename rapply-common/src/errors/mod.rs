//! Error taxonomy for rapply.
//!
//! [`ApplyError`] is the single error type returned by the core. Every
//! variant maps to a stable [`ErrorCode`] from the catalog so the CLI can
//! print a code, a message and remediation steps.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                              |
//! |------------|-------------|------------------------------------------|
//! | E001-E099  | Config      | Configuration and environment errors     |
//! | E100-E199  | Connection  | Transport and privilege escalation       |
//! | E200-E299  | Target      | OS support and remote command execution  |
//! | E300-E399  | Install     | Agent version checks and installation    |
//! | E400-E499  | Staging     | Uploads and local scratch files          |
//! | E500-E599  | Converge    | Remote agent run failures                |
//! | E600-E699  | Internal    | Scheduler and unexpected errors          |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::types::Protocol;
use crate::version_gate::AgentVersion;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, ApplyError>;

/// Errors raised by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Connect(String),

    #[error("failed to execute remote command: {0}")]
    Exec(String),

    #[error("failed to upload {} to {remote}: {message}", local.display())]
    Upload {
        local: PathBuf,
        remote: String,
        message: String,
    },

    #[error("protocol {0} is not supported by this transport")]
    UnsupportedProtocol(Protocol),

    #[error("transport session is not connected")]
    NotConnected,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Sub-reason of a connection failure, derived from transport error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailureReason {
    SudoPasswordRequired,
    BadSudoPassword,
    SudoMissing,
    SudoNoTty,
    NoAuthKeys,
    Unknown,
}

impl ConnectionFailureReason {
    /// Classify a transport failure message.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("password is required") || lower.contains("sudo requires a password")
        {
            Self::SudoPasswordRequired
        } else if lower.contains("wrong sudo password")
            || lower.contains("incorrect password")
            || lower.contains("sorry, try again")
        {
            Self::BadSudoPassword
        } else if lower.contains("can't find sudo command")
            || (lower.contains("sudo") && lower.contains("command not found"))
            || (lower.contains("sudo") && lower.contains("no such file"))
        {
            Self::SudoMissing
        } else if lower.contains("requires a tty")
            || lower.contains("must have a tty")
            || lower.contains("no tty present")
        {
            Self::SudoNoTty
        } else if lower.contains("has no keys added") || lower.contains("no identities") {
            Self::NoAuthKeys
        } else {
            Self::Unknown
        }
    }

    pub fn code(self) -> ErrorCode {
        match self {
            Self::SudoPasswordRequired => ErrorCode::SudoPasswordRequired,
            Self::BadSudoPassword => ErrorCode::SudoBadPassword,
            Self::SudoMissing => ErrorCode::SudoCommandNotFound,
            Self::SudoNoTty => ErrorCode::SudoRequiresTty,
            Self::NoAuthKeys => ErrorCode::SshNoAuthKeys,
            Self::Unknown => ErrorCode::ConnectionFailed,
        }
    }
}

/// Cause of a failed remote converge, mapped from the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergeFailure {
    /// A named resource raised during the run.
    ResourceError { resource: String, message: String },
    /// The policy uses a resource type the agent does not know.
    NoSuchResource { resource: String },
    /// A resource was given an unsupported action.
    InvalidAction { valid_actions: String, given: String },
    /// A resource property failed validation.
    ValidationFailed { message: String },
    /// Undefined method or variable in the policy.
    UndefinedName { message: String },
    Unknown { message: String },
}

impl ConvergeFailure {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ResourceError { .. } => ErrorCode::ConvergeResourceError,
            Self::NoSuchResource { .. } => ErrorCode::ConvergeNoSuchResource,
            Self::InvalidAction { .. } => ErrorCode::ConvergeInvalidAction,
            Self::ValidationFailed { .. } => ErrorCode::ConvergeValidationFailed,
            Self::UndefinedName { .. } => ErrorCode::ConvergeUndefinedName,
            Self::Unknown { .. } => ErrorCode::ConvergeFailed,
        }
    }
}

impl fmt::Display for ConvergeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceError { resource, message } => {
                write!(f, "resource {resource} failed: {message}")
            }
            Self::NoSuchResource { resource } => {
                write!(f, "no resource or provider named '{resource}' on this platform")
            }
            Self::InvalidAction {
                valid_actions,
                given,
            } => write!(
                f,
                "action ':{given}' is not valid, expected one of: {valid_actions}"
            ),
            Self::ValidationFailed { message } => write!(f, "validation failed: {message}"),
            Self::UndefinedName { message } => write!(f, "undefined name: {message}"),
            Self::Unknown { message } => f.write_str(message),
        }
    }
}

/// One failed job in a multi-target run.
#[derive(Debug)]
pub struct FailedJob {
    /// Reporting prefix of the job, normally the target host.
    pub prefix: String,
    pub error: ApplyError,
}

/// Errors returned by the rapply core.
#[derive(Debug, Error)]
pub enum ApplyError {
    // Config
    #[error("configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("failed to read configuration file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid environment overrides: {}", errors.join("; "))]
    ConfigEnv { errors: Vec<String> },

    // Connection
    #[error("failed to connect to {host}: {message}")]
    Connection {
        host: String,
        reason: ConnectionFailureReason,
        message: String,
    },

    #[error("transport error on {host}: {source}")]
    Transport {
        host: String,
        #[source]
        source: TransportError,
    },

    #[error("remote operation attempted on {host} before connecting")]
    NotConnected { host: String },

    // Target
    #[error("unsupported target operating system '{family}' on {host}")]
    UnsupportedTargetOs { host: String, family: String },

    #[error("command on {host} exited with status {exit_status}: {command}\n{output}")]
    RemoteExecutionFailed {
        host: String,
        command: String,
        exit_status: i32,
        output: String,
    },

    #[error("cannot install package {path}: only .rpm and .deb are supported on linux")]
    UnsupportedPackageFormat { path: String },

    // Install
    #[error("the configuration agent is not installed on {host}")]
    AgentNotInstalled { host: String },

    #[error(
        "installed agent {current} is older than the minimum {min13}; upgrade to {min13} and then to {min14} or newer"
    )]
    Agent13Outdated {
        current: AgentVersion,
        min13: AgentVersion,
        min14: AgentVersion,
    },

    #[error("installed agent {current} is older than the minimum {min14}")]
    Agent14Outdated {
        current: AgentVersion,
        min14: AgentVersion,
    },

    #[error("invalid agent version manifest at {path}: {message}")]
    InvalidVersionManifest { path: String, message: String },

    #[error("no agent package available for {platform}: {message}")]
    ArtifactLookup { platform: String, message: String },

    #[error("failed to download {url}: {message}")]
    ArtifactDownload { url: String, message: String },

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ArtifactChecksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // Staging
    #[error("failed to upload policy archive: {0}")]
    PolicyUploadFailed(#[source] TransportError),

    #[error("failed to upload agent configuration: {0}")]
    ConfigUploadFailed(#[source] TransportError),

    #[error("failed to upload report handler: {0}")]
    HandlerUploadFailed(#[source] TransportError),

    #[error("failed to upload trusted certificate {}: {source}", cert.display())]
    TrustedCertUploadFailed {
        cert: PathBuf,
        #[source]
        source: TransportError,
    },

    #[error("failed to upload agent package: {0}")]
    ArtifactUploadFailed(#[source] TransportError),

    #[error("{context}: {source}")]
    LocalIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Converge
    #[error("converge failed on {host}: {failure}")]
    ConvergeFailed {
        host: String,
        failure: ConvergeFailure,
    },

    #[error("converge failed on {host} and the run report at {path} could not be read")]
    ConvergeReportUnreadable { host: String, path: String },

    // Scheduler
    #[error("{}", format_failed_jobs(.0))]
    MultiJobFailure(Vec<FailedJob>),

    #[error("task for {prefix} terminated unexpectedly: {message}")]
    JobPanicked { prefix: String, message: String },
}

fn format_failed_jobs(jobs: &[FailedJob]) -> String {
    let mut out = format!("{} targets failed:", jobs.len());
    for job in jobs {
        out.push_str(&format!(
            "\n  {}: [{}] {}",
            job.prefix,
            job.error.code().code_string(),
            job.error
        ));
    }
    out
}

impl ApplyError {
    /// Stable catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Self::ConfigRead { .. } => ErrorCode::ConfigReadError,
            Self::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Self::ConfigEnv { .. } => ErrorCode::ConfigEnvError,
            Self::Connection { reason, .. } => reason.code(),
            Self::Transport { source, .. } => match source {
                TransportError::UnsupportedProtocol(_) => ErrorCode::TransportUnavailable,
                TransportError::NotConnected => ErrorCode::NotConnected,
                _ => ErrorCode::ConnectionFailed,
            },
            Self::NotConnected { .. } => ErrorCode::NotConnected,
            Self::UnsupportedTargetOs { .. } => ErrorCode::UnsupportedTargetOs,
            Self::RemoteExecutionFailed { .. } => ErrorCode::RemoteExecutionFailed,
            Self::UnsupportedPackageFormat { .. } => ErrorCode::UnsupportedPackageFormat,
            Self::AgentNotInstalled { .. } => ErrorCode::AgentNotInstalled,
            Self::Agent13Outdated { .. } => ErrorCode::Agent13Outdated,
            Self::Agent14Outdated { .. } => ErrorCode::Agent14Outdated,
            Self::InvalidVersionManifest { .. } => ErrorCode::VersionManifestInvalid,
            Self::ArtifactLookup { .. } => ErrorCode::ArtifactLookupFailed,
            Self::ArtifactDownload { .. } => ErrorCode::ArtifactDownloadFailed,
            Self::ArtifactChecksum { .. } => ErrorCode::ArtifactChecksumMismatch,
            Self::PolicyUploadFailed(_) => ErrorCode::PolicyUploadFailed,
            Self::ConfigUploadFailed(_) => ErrorCode::ConfigUploadFailed,
            Self::HandlerUploadFailed(_) => ErrorCode::HandlerUploadFailed,
            Self::TrustedCertUploadFailed { .. } => ErrorCode::TrustedCertUploadFailed,
            Self::ArtifactUploadFailed(_) => ErrorCode::ArtifactUploadFailed,
            Self::LocalIo { .. } => ErrorCode::LocalScratchFailed,
            Self::ConvergeFailed { failure, .. } => failure.code(),
            Self::ConvergeReportUnreadable { .. } => ErrorCode::ConvergeReportUnreadable,
            Self::MultiJobFailure(_) => ErrorCode::MultiJobFailure,
            Self::JobPanicked { .. } => ErrorCode::JobPanicked,
        }
    }

    /// Catalog entry with remediation steps.
    pub fn entry(&self) -> ErrorEntry {
        self.code().entry()
    }

    pub(crate) fn local_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::LocalIo {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_sudo_reasons() {
        assert_eq!(
            ConnectionFailureReason::classify("sudo: a password is required"),
            ConnectionFailureReason::SudoPasswordRequired
        );
        assert_eq!(
            ConnectionFailureReason::classify(
                "Sorry, try again.\nsudo: 3 incorrect password attempts"
            ),
            ConnectionFailureReason::BadSudoPassword
        );
        assert_eq!(
            ConnectionFailureReason::classify("sh: sudo: command not found"),
            ConnectionFailureReason::SudoMissing
        );
        assert_eq!(
            ConnectionFailureReason::classify("sudo: sorry, you must have a tty to run sudo"),
            ConnectionFailureReason::SudoNoTty
        );
        assert_eq!(
            ConnectionFailureReason::classify("Agent pid 12 has no keys added"),
            ConnectionFailureReason::NoAuthKeys
        );
        assert_eq!(
            ConnectionFailureReason::classify("Connection refused"),
            ConnectionFailureReason::Unknown
        );
    }

    #[test]
    fn test_connection_error_code_follows_reason() {
        let err = ApplyError::Connection {
            host: "node1".to_string(),
            reason: ConnectionFailureReason::SudoNoTty,
            message: "requires a tty".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::SudoRequiresTty);
        assert_eq!(err.entry().code, "RAP-E104");
    }

    #[test]
    fn test_unsupported_protocol_is_transport_unavailable() {
        let err = ApplyError::Transport {
            host: "win1".to_string(),
            source: TransportError::UnsupportedProtocol(Protocol::Winrm),
        };
        assert_eq!(err.code(), ErrorCode::TransportUnavailable);
        assert_eq!(err.entry().code, "RAP-E106");
    }

    #[test]
    fn test_multi_job_failure_lists_each_target() {
        let err = ApplyError::MultiJobFailure(vec![
            FailedJob {
                prefix: "web1".to_string(),
                error: ApplyError::AgentNotInstalled {
                    host: "web1".to_string(),
                },
            },
            FailedJob {
                prefix: "web2".to_string(),
                error: ApplyError::ConvergeReportUnreadable {
                    host: "web2".to_string(),
                    path: "/var/chef-workstation/cache/run-report.json".to_string(),
                },
            },
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 targets failed:"));
        assert!(text.contains("web1: [RAP-E300]"));
        assert!(text.contains("web2: [RAP-E501]"));
        assert_eq!(err.code(), ErrorCode::MultiJobFailure);
    }

    #[test]
    fn test_converge_failure_codes() {
        let failure = ConvergeFailure::NoSuchResource {
            resource: "frobnicate".to_string(),
        };
        assert_eq!(failure.code(), ErrorCode::ConvergeNoSuchResource);
        let unknown = ConvergeFailure::Unknown {
            message: "boom".to_string(),
        };
        assert_eq!(unknown.to_string(), "boom");
        assert_eq!(unknown.code(), ErrorCode::ConvergeFailed);
    }
}
