//! Agent version checks.
//!
//! Decides whether the installed agent can run a converge, needs an
//! install, or needs an upgrade. Two major lines are supported (13 and 14),
//! each with an OS-specific minimum patch release.

use crate::errors::{ApplyError, Result};
use crate::types::OsFamily;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Three-part agent version. Build metadata after `+` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl AgentVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for AgentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for AgentVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let core = s.trim().split('+').next().unwrap_or_default();
        let core = core.split('-').next().unwrap_or_default();
        let mut parts = core.split('.');
        let mut next = |name: &str| -> std::result::Result<u32, String> {
            match parts.next() {
                None => Ok(0),
                Some(p) => p
                    .parse::<u32>()
                    .map_err(|_| format!("invalid {name} component '{p}' in version '{s}'")),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if core.is_empty() {
            return Err(format!("empty version string '{s}'"));
        }
        Ok(Self::new(major, minor, patch))
    }
}

/// Major line an upgrade should target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionLine {
    V13,
    V14,
}

impl VersionLine {
    pub fn major(self) -> u32 {
        match self {
            Self::V13 => 13,
            Self::V14 => 14,
        }
    }
}

/// Minimum supported versions for one OS family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimumVersions {
    pub min13: AgentVersion,
    pub min14: AgentVersion,
}

impl MinimumVersions {
    pub fn for_os(os: OsFamily) -> Self {
        match os {
            OsFamily::Windows => Self {
                min13: AgentVersion::new(13, 10, 4),
                min14: AgentVersion::new(14, 4, 22),
            },
            _ => Self {
                min13: AgentVersion::new(13, 10, 4),
                min14: AgentVersion::new(14, 1, 1),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallDecision {
    AlreadyCompatible(AgentVersion),
    NotInstalled,
    UpgradeRequired {
        current: AgentVersion,
        line: VersionLine,
        min13: AgentVersion,
        min14: AgentVersion,
    },
}

/// Classify an installed version against the OS minimums.
pub fn classify(installed: Option<AgentVersion>, os: OsFamily) -> InstallDecision {
    let Some(current) = installed else {
        return InstallDecision::NotInstalled;
    };
    let MinimumVersions { min13, min14 } = MinimumVersions::for_os(os);
    let v13 = AgentVersion::new(13, 0, 0);
    let v14 = AgentVersion::new(14, 0, 0);

    let line = if current >= v14 {
        (current < min14).then_some(VersionLine::V14)
    } else if current >= v13 {
        (current < min13).then_some(VersionLine::V13)
    } else {
        // Below 13 always goes to the 13 line first.
        Some(VersionLine::V13)
    };

    match line {
        None => InstallDecision::AlreadyCompatible(current),
        Some(line) => InstallDecision::UpgradeRequired {
            current,
            line,
            min13,
            min14,
        },
    }
}

/// Classify and, in check-only mode, turn anything but a compatible agent
/// into an error.
pub fn evaluate(
    host: &str,
    installed: Option<AgentVersion>,
    os: OsFamily,
    check_only: bool,
) -> Result<InstallDecision> {
    let decision = classify(installed, os);
    if !check_only {
        return Ok(decision);
    }
    match decision {
        InstallDecision::AlreadyCompatible(_) => Ok(decision),
        InstallDecision::NotInstalled => Err(ApplyError::AgentNotInstalled {
            host: host.to_string(),
        }),
        InstallDecision::UpgradeRequired {
            current,
            line: VersionLine::V13,
            min13,
            min14,
        } => Err(ApplyError::Agent13Outdated {
            current,
            min13,
            min14,
        }),
        InstallDecision::UpgradeRequired {
            current,
            line: VersionLine::V14,
            min14,
            ..
        } => Err(ApplyError::Agent14Outdated { current, min14 }),
    }
}
