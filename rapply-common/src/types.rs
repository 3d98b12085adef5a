//! Common types used across rapply components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Transport protocol used to reach a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ssh,
    Winrm,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Ssh => 22,
            Self::Winrm => 5985,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Winrm => "winrm",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(Self::Ssh),
            "winrm" => Ok(Self::Winrm),
            other => Err(format!("unsupported protocol '{other}' (expected ssh or winrm)")),
        }
    }
}

/// Operating system family of a connected target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
    Macos,
    Solaris,
    Aix,
    Unknown,
}

impl OsFamily {
    /// Classify a platform family string as reported by a transport.
    pub fn from_family(family: &str) -> Self {
        match family.trim().to_ascii_lowercase().as_str() {
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            "darwin" | "macos" | "mac_os_x" => Self::Macos,
            "solaris" | "sunos" | "solaris2" => Self::Solaris,
            "aix" => Self::Aix,
            _ => Self::Unknown,
        }
    }

    pub fn is_windows(self) -> bool {
        self == Self::Windows
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Macos => "macos",
            Self::Solaris => "solaris",
            Self::Aix => "aix",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Platform details detected on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Kernel family (linux, windows, darwin, solaris, aix, ...).
    pub family: String,
    /// Distribution or product name (ubuntu, redhat, mac_os_x, windows, ...).
    pub name: String,
    /// Release or version string.
    pub release: String,
    /// Machine architecture (x86_64, aarch64, ...).
    pub arch: String,
}

impl Platform {
    pub fn new(
        family: impl Into<String>,
        name: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            family: family.into(),
            name: name.into(),
            release: release.into(),
            arch: arch.into(),
        }
    }

    pub fn os_family(&self) -> OsFamily {
        OsFamily::from_family(&self.family)
    }
}

/// Result of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(exit_status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Captured stderr, or stdout when stderr is empty.
    pub fn diagnostic_output(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Identity and credentials of one remote target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_sudo")]
    pub sudo: bool,
    #[serde(default, skip_serializing)]
    pub sudo_password: Option<String>,
    #[serde(default)]
    pub sudo_command: Option<String>,
}

fn default_sudo() -> bool {
    true
}

impl TargetSpec {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
            protocol: Protocol::Ssh,
            identity_file: None,
            sudo: true,
            sudo_password: None,
            sudo_command: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// User the connection authenticates as. Falls back to `root` the way
    /// ssh transports do when nothing is configured.
    pub fn effective_user(&self) -> &str {
        self.user.as_deref().unwrap_or(match self.protocol {
            Protocol::Ssh => "root",
            Protocol::Winrm => "administrator",
        })
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(self.protocol.default_port())
    }

    pub fn sudo_command(&self) -> &str {
        self.sudo_command.as_deref().unwrap_or("sudo")
    }

    /// Parse one `[proto://][user@]host[:port]` specifier.
    pub fn parse(spec: &str, default_protocol: Protocol) -> Result<Self, String> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err("empty target specifier".to_string());
        }

        let (protocol, rest) = match spec.split_once("://") {
            Some((proto, rest)) => (proto.parse::<Protocol>()?, rest),
            None => (default_protocol, spec),
        };

        let (user, host_port) = match rest.rsplit_once('@') {
            Some((user, host)) if !user.is_empty() => (Some(user.to_string()), host),
            Some((_, host)) => (None, host),
            None => (None, rest),
        };

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port '{port}' in target '{spec}'"))?;
                (host, Some(port))
            }
            None => (host_port, None),
        };

        if host.is_empty() {
            return Err(format!("missing host in target '{spec}'"));
        }

        let mut target = TargetSpec::new(host).with_protocol(protocol);
        target.user = user;
        target.port = port;
        Ok(target)
    }

    /// Parse a comma-separated list of target specifiers, preserving order.
    pub fn parse_list(list: &str, default_protocol: Protocol) -> Result<Vec<Self>, String> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| Self::parse(s, default_protocol))
            .collect()
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)
    }
}
