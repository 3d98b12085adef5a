//! Error Catalog for rapply
//!
//! Every user-facing failure has a stable code, a message and remediation
//! steps, so that single-target and multi-target runs report the same text
//! for the same cause.
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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all rapply error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Explicitly requested configuration file does not exist
    ConfigNotFound,
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML
    ConfigParseError,
    /// Environment override has an invalid value
    ConfigEnvError,

    // =========================================================================
    // Connection Errors (E100-E199)
    // =========================================================================
    /// Connection failed for a reason we could not classify
    ConnectionFailed,
    /// sudo asked for a password and none was given
    SudoPasswordRequired,
    /// sudo rejected the password
    SudoBadPassword,
    /// sudo binary is not present on the target
    SudoCommandNotFound,
    /// sudo is configured to require a TTY
    SudoRequiresTty,
    /// ssh-agent has no identities and no key file was given
    SshNoAuthKeys,
    /// The requested protocol has no available transport
    TransportUnavailable,
    /// A remote operation was attempted before connecting
    NotConnected,

    // =========================================================================
    // Target Errors (E200-E299)
    // =========================================================================
    /// Target OS is not supported
    UnsupportedTargetOs,
    /// A remote command exited non-zero
    RemoteExecutionFailed,
    /// The agent package has an extension the target cannot install
    UnsupportedPackageFormat,

    // =========================================================================
    // Install Errors (E300-E399)
    // =========================================================================
    /// Agent missing and installation disabled
    AgentNotInstalled,
    /// Installed agent is older than the 13.x minimum
    Agent13Outdated,
    /// Installed agent is older than the 14.x minimum
    Agent14Outdated,
    /// Version manifest exists but could not be parsed
    VersionManifestInvalid,
    /// No agent artifact matches the target platform
    ArtifactLookupFailed,
    /// Agent artifact download failed
    ArtifactDownloadFailed,
    /// Downloaded artifact does not match its published checksum
    ArtifactChecksumMismatch,

    // =========================================================================
    // Staging Errors (E400-E499)
    // =========================================================================
    /// Policy archive upload failed
    PolicyUploadFailed,
    /// Runtime configuration upload failed
    ConfigUploadFailed,
    /// Report handler upload failed
    HandlerUploadFailed,
    /// Trusted certificate upload failed
    TrustedCertUploadFailed,
    /// Agent artifact upload failed
    ArtifactUploadFailed,
    /// Local scratch file could not be written
    LocalScratchFailed,

    // =========================================================================
    // Converge Errors (E500-E599)
    // =========================================================================
    /// Remote run failed with an unrecognized cause
    ConvergeFailed,
    /// Remote run failed and its report could not be read
    ConvergeReportUnreadable,
    /// A resource failed during the run
    ConvergeResourceError,
    /// The policy references a resource type the agent does not know
    ConvergeNoSuchResource,
    /// A resource was given an action it does not support
    ConvergeInvalidAction,
    /// A resource property failed validation
    ConvergeValidationFailed,
    /// The policy references an undefined name or method
    ConvergeUndefinedName,

    // =========================================================================
    // Internal Errors (E600-E699)
    // =========================================================================
    /// More than one target failed
    MultiJobFailure,
    /// A per-target task panicked
    JobPanicked,
}

impl ErrorCode {
    /// Returns the numeric error code (without prefix).
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigNotFound => 1,
            Self::ConfigReadError => 2,
            Self::ConfigParseError => 3,
            Self::ConfigEnvError => 4,

            Self::ConnectionFailed => 100,
            Self::SudoPasswordRequired => 101,
            Self::SudoBadPassword => 102,
            Self::SudoCommandNotFound => 103,
            Self::SudoRequiresTty => 104,
            Self::SshNoAuthKeys => 105,
            Self::TransportUnavailable => 106,
            Self::NotConnected => 107,

            Self::UnsupportedTargetOs => 200,
            Self::RemoteExecutionFailed => 201,
            Self::UnsupportedPackageFormat => 202,

            Self::AgentNotInstalled => 300,
            Self::Agent13Outdated => 301,
            Self::Agent14Outdated => 302,
            Self::VersionManifestInvalid => 303,
            Self::ArtifactLookupFailed => 304,
            Self::ArtifactDownloadFailed => 305,
            Self::ArtifactChecksumMismatch => 306,

            Self::PolicyUploadFailed => 400,
            Self::ConfigUploadFailed => 401,
            Self::HandlerUploadFailed => 402,
            Self::TrustedCertUploadFailed => 403,
            Self::ArtifactUploadFailed => 404,
            Self::LocalScratchFailed => 405,

            Self::ConvergeFailed => 500,
            Self::ConvergeReportUnreadable => 501,
            Self::ConvergeResourceError => 502,
            Self::ConvergeNoSuchResource => 503,
            Self::ConvergeInvalidAction => 504,
            Self::ConvergeValidationFailed => 505,
            Self::ConvergeUndefinedName => 506,

            Self::MultiJobFailure => 600,
            Self::JobPanicked => 601,
        }
    }

    /// Returns the formatted error code string (e.g., "RAP-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("RAP-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Connection,
            200..=299 => ErrorCategory::Target,
            300..=399 => ErrorCategory::Install,
            400..=499 => ErrorCategory::Staging,
            500..=599 => ErrorCategory::Converge,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "Configuration file not found",
            Self::ConfigReadError => "Failed to read configuration file",
            Self::ConfigParseError => "Configuration file contains invalid TOML syntax",
            Self::ConfigEnvError => "Environment variable has invalid value",

            Self::ConnectionFailed => "Connection to the target failed",
            Self::SudoPasswordRequired => "sudo requires a password on the target",
            Self::SudoBadPassword => "sudo rejected the supplied password",
            Self::SudoCommandNotFound => "sudo command was not found on the target",
            Self::SudoRequiresTty => "sudo on the target requires a TTY",
            Self::SshNoAuthKeys => "No SSH keys are available for authentication",
            Self::TransportUnavailable => "No transport is available for the requested protocol",
            Self::NotConnected => "Remote operation attempted before connecting",

            Self::UnsupportedTargetOs => "Target operating system is not supported",
            Self::RemoteExecutionFailed => "Remote command exited with a non-zero status",
            Self::UnsupportedPackageFormat => "Agent package format is not supported on target",

            Self::AgentNotInstalled => "Configuration agent is not installed on the target",
            Self::Agent13Outdated => "Installed agent is older than the supported 13.x minimum",
            Self::Agent14Outdated => "Installed agent is older than the supported 14.x minimum",
            Self::VersionManifestInvalid => "Agent version manifest could not be parsed",
            Self::ArtifactLookupFailed => "No agent package is available for the target platform",
            Self::ArtifactDownloadFailed => "Agent package download failed",
            Self::ArtifactChecksumMismatch => "Agent package failed checksum verification",

            Self::PolicyUploadFailed => "Failed to upload the policy archive to the target",
            Self::ConfigUploadFailed => "Failed to upload the agent configuration to the target",
            Self::HandlerUploadFailed => "Failed to upload the report handler to the target",
            Self::TrustedCertUploadFailed => "Failed to upload trusted certificates to the target",
            Self::ArtifactUploadFailed => "Failed to upload the agent package to the target",
            Self::LocalScratchFailed => "Failed to write a local scratch file",

            Self::ConvergeFailed => "The remote converge failed",
            Self::ConvergeReportUnreadable => "Remote converge failed and its report is unreadable",
            Self::ConvergeResourceError => "A resource failed during the remote converge",
            Self::ConvergeNoSuchResource => "The policy uses a resource type unknown to the agent",
            Self::ConvergeInvalidAction => "A resource was given an unsupported action",
            Self::ConvergeValidationFailed => "A resource property failed validation",
            Self::ConvergeUndefinedName => "The policy references an undefined name",

            Self::MultiJobFailure => "One or more targets failed",
            Self::JobPanicked => "A target task terminated unexpectedly",
        }
    }

    /// Returns remediation steps for this error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigNotFound => &[
                "Check the path passed to --config",
                "Omit --config to use ~/.rapply/config.toml",
            ],
            Self::ConfigReadError => &["Check file permissions on the configuration file"],
            Self::ConfigParseError => &[
                "Validate the file with a TOML linter",
                "Compare section names with the documented [log], [cache], [connection], [agent], [data_collector] sections",
            ],
            Self::ConfigEnvError => &["Fix or unset the RAPPLY_* variable named in the message"],

            Self::ConnectionFailed => &[
                "Verify the host is reachable and the service is listening",
                "Try connecting manually with the same user and key",
            ],
            Self::SudoPasswordRequired => &[
                "Pass --sudo-password, or configure NOPASSWD for the connecting user",
            ],
            Self::SudoBadPassword => &["Check the sudo password for the connecting user"],
            Self::SudoCommandNotFound => &[
                "Install sudo on the target",
                "Point --sudo-command at an equivalent binary",
                "Connect as root and pass --no-sudo",
            ],
            Self::SudoRequiresTty => &[
                "Remove 'Defaults requiretty' from sudoers for the connecting user",
            ],
            Self::SshNoAuthKeys => &[
                "Load a key into ssh-agent with ssh-add",
                "Pass --identity-file",
            ],
            Self::TransportUnavailable => &["Use ssh, or install a transport for this protocol"],
            Self::NotConnected => &["Report this as a bug; connect must precede remote operations"],

            Self::UnsupportedTargetOs => &[
                "Supported targets are Linux, Windows, macOS, Solaris and AIX",
            ],
            Self::RemoteExecutionFailed => &[
                "Inspect the command output included in the message",
                "Re-run with --verbose for the full remote transcript",
            ],
            Self::UnsupportedPackageFormat => &["Only .rpm and .deb packages install on Linux"],

            Self::AgentNotInstalled => &[
                "Re-run with --install to let rapply install the agent",
                "Install the agent manually",
            ],
            Self::Agent13Outdated => &[
                "Upgrade the agent to the 13.x minimum first, then to 14.x",
                "Re-run with --install to upgrade automatically",
            ],
            Self::Agent14Outdated => &[
                "Upgrade the agent to the 14.x minimum",
                "Re-run with --install to upgrade automatically",
            ],
            Self::VersionManifestInvalid => &["Reinstall the agent on the target"],
            Self::ArtifactLookupFailed => &["Check that the target platform is supported"],
            Self::ArtifactDownloadFailed => &["Check network access to the package repository"],
            Self::ArtifactChecksumMismatch => &[
                "Retry the run",
                "Check for a proxy that rewrites downloads",
            ],

            Self::PolicyUploadFailed
            | Self::ConfigUploadFailed
            | Self::HandlerUploadFailed
            | Self::TrustedCertUploadFailed
            | Self::ArtifactUploadFailed => &[
                "Check free space in the remote temp directory",
                "Check that the connecting user can write to it",
            ],
            Self::LocalScratchFailed => &["Check free space in the local temp directory"],

            Self::ConvergeFailed | Self::ConvergeResourceError => &[
                "Review the remote error included in the message",
                "Re-run with --verbose for the agent output",
            ],
            Self::ConvergeReportUnreadable => &[
                "Inspect the agent log on the target",
                "Check that the cache directory on the target is writable",
            ],
            Self::ConvergeNoSuchResource => &["Check the resource type name for typos"],
            Self::ConvergeInvalidAction => &["Use one of the actions listed in the message"],
            Self::ConvergeValidationFailed => &["Correct the property value named in the message"],
            Self::ConvergeUndefinedName => &["Check the recipe for misspelled names"],

            Self::MultiJobFailure => &["See the per-target errors listed below"],
            Self::JobPanicked => &["Report this as a bug with the log file attached"],
        }
    }

    /// All error codes, for iteration and uniqueness checks.
    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigNotFound,
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigEnvError,
            Self::ConnectionFailed,
            Self::SudoPasswordRequired,
            Self::SudoBadPassword,
            Self::SudoCommandNotFound,
            Self::SudoRequiresTty,
            Self::SshNoAuthKeys,
            Self::TransportUnavailable,
            Self::NotConnected,
            Self::UnsupportedTargetOs,
            Self::RemoteExecutionFailed,
            Self::UnsupportedPackageFormat,
            Self::AgentNotInstalled,
            Self::Agent13Outdated,
            Self::Agent14Outdated,
            Self::VersionManifestInvalid,
            Self::ArtifactLookupFailed,
            Self::ArtifactDownloadFailed,
            Self::ArtifactChecksumMismatch,
            Self::PolicyUploadFailed,
            Self::ConfigUploadFailed,
            Self::HandlerUploadFailed,
            Self::TrustedCertUploadFailed,
            Self::ArtifactUploadFailed,
            Self::LocalScratchFailed,
            Self::ConvergeFailed,
            Self::ConvergeReportUnreadable,
            Self::ConvergeResourceError,
            Self::ConvergeNoSuchResource,
            Self::ConvergeInvalidAction,
            Self::ConvergeValidationFailed,
            Self::ConvergeUndefinedName,
            Self::MultiJobFailure,
            Self::JobPanicked,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code_string(), self.message())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Configuration and environment errors (E001-E099)
    Config,
    /// Transport and privilege escalation errors (E100-E199)
    Connection,
    /// OS support and remote execution errors (E200-E299)
    Target,
    /// Agent version and installation errors (E300-E399)
    Install,
    /// Upload and scratch file errors (E400-E499)
    Staging,
    /// Remote converge errors (E500-E599)
    Converge,
    /// Scheduler and unexpected errors (E600-E699)
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Connection => "Connection",
            Self::Target => "Target",
            Self::Install => "Install",
            Self::Staging => "Staging",
            Self::Converge => "Converge",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "RAP-E001")
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            let num = code.code_number();
            assert!(
                seen.insert(num),
                "Duplicate error code number: {} for {:?}",
                num,
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.code_string(), "RAP-E001");
        assert_eq!(ErrorCode::ConnectionFailed.code_string(), "RAP-E100");
        assert_eq!(ErrorCode::UnsupportedTargetOs.code_string(), "RAP-E200");
        assert_eq!(ErrorCode::AgentNotInstalled.code_string(), "RAP-E300");
        assert_eq!(ErrorCode::PolicyUploadFailed.code_string(), "RAP-E400");
        assert_eq!(ErrorCode::ConvergeFailed.code_string(), "RAP-E500");
        assert_eq!(ErrorCode::MultiJobFailure.code_string(), "RAP-E600");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCode::ConfigParseError.category(), ErrorCategory::Config);
        assert_eq!(
            ErrorCode::SudoRequiresTty.category(),
            ErrorCategory::Connection
        );
        assert_eq!(
            ErrorCode::RemoteExecutionFailed.category(),
            ErrorCategory::Target
        );
        assert_eq!(ErrorCode::Agent14Outdated.category(), ErrorCategory::Install);
        assert_eq!(
            ErrorCode::HandlerUploadFailed.category(),
            ErrorCategory::Staging
        );
        assert_eq!(
            ErrorCode::ConvergeReportUnreadable.category(),
            ErrorCategory::Converge
        );
        assert_eq!(ErrorCode::JobPanicked.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_every_code_has_message_and_remediation() {
        for code in ErrorCode::all() {
            assert!(!code.message().is_empty(), "{code:?} has no message");
            assert!(
                !code.remediation().is_empty(),
                "{code:?} has no remediation"
            );
        }
    }

    #[test]
    fn test_format_full_numbers_steps() {
        let full = ErrorCode::SudoCommandNotFound.entry().format_full();
        assert!(full.starts_with("[RAP-E103]"));
        assert!(full.contains("  1. Install sudo on the target"));
        assert!(full.contains("  3. Connect as root"));
    }
}
