//! Transport contract used by [`RemoteTarget`](crate::target::RemoteTarget).
//!
//! A transport owns the wire session to one host. It knows how to connect
//! and detect the platform, run a command and copy a local file to a remote
//! path. Everything OS-specific above that lives in the target capabilities.

pub mod retry;
#[cfg(unix)]
pub mod ssh;

pub use retry::{ConnectRetryPolicy, RetryableError, run_with_retry};
#[cfg(unix)]
pub use ssh::{KnownHostsPolicy, SshOptions, SshTransport};

use crate::errors::TransportError;
use crate::types::{CommandOutput, Platform};
use std::future::Future;
use std::path::Path;

pub trait Transport: Send + Sync {
    /// Open the session and detect the remote platform.
    fn connect(&mut self) -> impl Future<Output = Result<Platform, TransportError>> + Send;

    /// Run a command to completion. A non-zero exit is not an error here.
    fn run_command(
        &self,
        command: &str,
    ) -> impl Future<Output = Result<CommandOutput, TransportError>> + Send;

    /// Copy a local file to `remote_path`.
    fn upload(
        &self,
        local: &Path,
        remote_path: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Parse the output of the platform probe run right after connecting.
///
/// POSIX hosts answer `uname -s`, `uname -m`, then a release line: the
/// product version from `sw_vers` on macOS, `oslevel` on AIX, otherwise
/// `"$ID $VERSION_ID"` from `/etc/os-release` or `uname -r`. Windows hosts
/// answer `cmd /c ver`.
pub fn parse_platform_probe(output: &str) -> Option<Platform> {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let first = lines.first()?;

    if first.starts_with("Microsoft Windows") {
        let release = first
            .split("Version")
            .nth(1)
            .map(|v| v.trim().trim_end_matches(']').trim().to_string())
            .unwrap_or_default();
        return Some(Platform::new("windows", "windows", release, "x86_64"));
    }

    let kernel = first.to_ascii_lowercase();
    let arch = lines.get(1).copied().unwrap_or("unknown").to_string();
    let detail = lines.get(2).copied().unwrap_or("");

    let (family, name, release) = match kernel.as_str() {
        "linux" => {
            let mut parts = detail.split_whitespace();
            let id = parts.next().unwrap_or("linux").trim_matches('"');
            let version = parts.next().unwrap_or("").trim_matches('"');
            ("linux", linux_platform_name(id), version.to_string())
        }
        "darwin" => ("darwin", "mac_os_x".to_string(), detail.to_string()),
        "sunos" => ("solaris", "solaris2".to_string(), detail.to_string()),
        "aix" => ("aix", "aix".to_string(), detail.to_string()),
        _ => (kernel.as_str(), kernel.clone(), detail.to_string()),
    };

    Some(Platform::new(family, name, release, arch))
}

fn linux_platform_name(os_release_id: &str) -> String {
    match os_release_id {
        "rhel" => "redhat".to_string(),
        "amzn" => "amazon".to_string(),
        "sles" | "opensuse" | "opensuse-leap" => "suse".to_string(),
        other => other.to_string(),
    }
}
