//! Per-OS command builders.
//!
//! A [`RemoteCapabilities`] value only produces command text and fixed
//! paths. [`RemoteTarget`](super::RemoteTarget) runs the commands. The
//! default methods are the POSIX forms; Windows overrides nearly all of
//! them.

use crate::errors::{ApplyError, Result};
use crate::types::OsFamily;

const POSIX_MKTEMP: &str =
    "bash -c 'd=$(mktemp -d -p${TMPDIR:-/tmp} chef_XXXXXX); echo $d'";
const POSIX_MANIFEST: &str = "/opt/chef/version-manifest.json";
const POSIX_WS_CACHE: &str = "/var/chef-workstation";

const WINDOWS_MKTEMP: &str = "$parent = [System.IO.Path]::GetTempPath();\
[string] $name = [System.Guid]::NewGuid();\
$tmp = New-Item -ItemType Directory -Path (Join-Path $parent $name);\
$tmp.FullName";
const WINDOWS_MANIFEST: &str = "c:\\opscode\\chef\\version-manifest.json";
const WINDOWS_WS_CACHE: &str = "C:/chef-workstation";

const MACOS_INSTALLER_DIR: &str = "/tmp/chef-installer";

pub trait RemoteCapabilities: Send + Sync {
    fn os_family(&self) -> OsFamily;

    fn make_directory(&self, path: &str) -> String {
        format!("mkdir -p {path}")
    }

    /// `None` when the platform has no ownership change to make.
    fn chown(&self, path: &str, owner: &str) -> Option<String> {
        Some(format!("chown {owner} '{path}'"))
    }

    /// Command whose trimmed stdout is the new temp directory.
    fn make_temp_dir(&self) -> String {
        POSIX_MKTEMP.to_string()
    }

    fn install_package(&self, remote_path: &str) -> Result<String>;

    fn delete_file(&self, path: &str) -> String {
        format!("rm -rf {path}")
    }

    fn delete_directory(&self, path: &str) -> String {
        self.delete_file(path)
    }

    /// Print a file's contents, exiting non-zero when it is not a regular file.
    fn read_file(&self, path: &str) -> String {
        format!("test -f '{path}' && cat '{path}'")
    }

    fn normalize_path(&self, path: &str) -> String {
        path.to_string()
    }

    fn join_path(&self, base: &str, name: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }

    fn version_manifest_path(&self) -> &'static str {
        POSIX_MANIFEST
    }

    /// Agent cache and repo root used by remote runs.
    fn ws_cache_path(&self) -> &'static str {
        POSIX_WS_CACHE
    }
}

/// Pick the capability set for a detected OS family.
pub fn capabilities_for(os: OsFamily) -> Option<Box<dyn RemoteCapabilities>> {
    match os {
        OsFamily::Linux => Some(Box::new(LinuxCapabilities)),
        OsFamily::Windows => Some(Box::new(WindowsCapabilities)),
        OsFamily::Macos => Some(Box::new(MacOsCapabilities)),
        OsFamily::Solaris => Some(Box::new(SolarisCapabilities)),
        OsFamily::Aix => Some(Box::new(AixCapabilities)),
        OsFamily::Unknown => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxCapabilities;

impl RemoteCapabilities for LinuxCapabilities {
    fn os_family(&self) -> OsFamily {
        OsFamily::Linux
    }

    fn install_package(&self, remote_path: &str) -> Result<String> {
        if remote_path.ends_with(".rpm") {
            Ok(format!("rpm -Uvh {remote_path}"))
        } else if remote_path.ends_with(".deb") {
            Ok(format!("dpkg -i {remote_path}"))
        } else {
            Err(ApplyError::UnsupportedPackageFormat {
                path: remote_path.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsCapabilities;

impl RemoteCapabilities for WindowsCapabilities {
    fn os_family(&self) -> OsFamily {
        OsFamily::Windows
    }

    fn make_directory(&self, path: &str) -> String {
        format!("New-Item -ItemType Directory -Force -Path {path}")
    }

    fn chown(&self, _path: &str, _owner: &str) -> Option<String> {
        None
    }

    fn make_temp_dir(&self) -> String {
        WINDOWS_MKTEMP.to_string()
    }

    fn install_package(&self, remote_path: &str) -> Result<String> {
        // cmd.exe rejects forward slashes in the package path
        Ok(format!(
            "cmd /c msiexec /package {} /quiet",
            remote_path.replace('/', "\\")
        ))
    }

    fn delete_file(&self, path: &str) -> String {
        format!("If (Test-Path {path}) {{ Remove-Item -Force -Path {path} }}")
    }

    fn delete_directory(&self, path: &str) -> String {
        format!("Remove-Item -Recurse -Force -Path {path}")
    }

    fn read_file(&self, path: &str) -> String {
        format!(
            "if (Test-Path -PathType Leaf '{path}') {{ Get-Content -Raw '{path}' }} else {{ exit 1 }}"
        )
    }

    fn normalize_path(&self, path: &str) -> String {
        path.replace('\\', "/")
    }

    /// Joins with `/` when `base` is already normalized, a backslash otherwise.
    fn join_path(&self, base: &str, name: &str) -> String {
        let separator = if base.contains('/') && !base.contains('\\') {
            '/'
        } else {
            '\\'
        };
        format!("{}{separator}{}", base.trim_end_matches(['\\', '/']), name)
    }

    fn version_manifest_path(&self) -> &'static str {
        WINDOWS_MANIFEST
    }

    fn ws_cache_path(&self) -> &'static str {
        WINDOWS_WS_CACHE
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MacOsCapabilities;

impl RemoteCapabilities for MacOsCapabilities {
    fn os_family(&self) -> OsFamily {
        OsFamily::Macos
    }

    fn make_temp_dir(&self) -> String {
        format!(
            "mkdir -p {MACOS_INSTALLER_DIR} && chmod 777 {MACOS_INSTALLER_DIR} && echo {MACOS_INSTALLER_DIR}"
        )
    }

    fn install_package(&self, remote_path: &str) -> Result<String> {
        Ok(format!(
            "hdiutil detach \"/Volumes/chef_software\" >/dev/null 2>&1 || true\n\
hdiutil attach {remote_path} -mountpoint \"/Volumes/chef_software\"\n\
cd / && /usr/sbin/installer -pkg `find \"/Volumes/chef_software\" -name \\*.pkg` -target /"
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SolarisCapabilities;

impl RemoteCapabilities for SolarisCapabilities {
    fn os_family(&self) -> OsFamily {
        OsFamily::Solaris
    }

    fn install_package(&self, remote_path: &str) -> Result<String> {
        Ok(format!("pkgadd -n -d {remote_path} all"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AixCapabilities;

impl RemoteCapabilities for AixCapabilities {
    fn os_family(&self) -> OsFamily {
        OsFamily::Aix
    }

    fn install_package(&self, remote_path: &str) -> Result<String> {
        Ok(format!("installp -aXYgd {remote_path} all"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_covers_known_families() {
        for os in [
            OsFamily::Linux,
            OsFamily::Windows,
            OsFamily::Macos,
            OsFamily::Solaris,
            OsFamily::Aix,
        ] {
            assert_eq!(capabilities_for(os).unwrap().os_family(), os);
        }
        assert!(capabilities_for(OsFamily::Unknown).is_none());
    }

    #[test]
    fn test_linux_install_by_extension() {
        let caps = LinuxCapabilities;
        assert_eq!(
            caps.install_package("/tmp/chef_a/chef-14.1.1.el7.rpm").unwrap(),
            "rpm -Uvh /tmp/chef_a/chef-14.1.1.el7.rpm"
        );
        assert_eq!(
            caps.install_package("/tmp/chef_a/chef_14.1.1_amd64.deb").unwrap(),
            "dpkg -i /tmp/chef_a/chef_14.1.1_amd64.deb"
        );
        assert!(matches!(
            caps.install_package("/tmp/chef_a/chef.tar.gz"),
            Err(ApplyError::UnsupportedPackageFormat { .. })
        ));
    }

    #[test]
    fn test_posix_commands() {
        let caps = SolarisCapabilities;
        assert_eq!(caps.make_directory("/tmp/d/x"), "mkdir -p /tmp/d/x");
        assert_eq!(caps.chown("/tmp/d", "deploy").as_deref(), Some("chown deploy '/tmp/d'"));
        assert_eq!(caps.delete_directory("/tmp/d"), "rm -rf /tmp/d");
        assert_eq!(
            caps.install_package("/tmp/d/chef.pkg").unwrap(),
            "pkgadd -n -d /tmp/d/chef.pkg all"
        );
        assert_eq!(
            AixCapabilities.install_package("/tmp/d/chef.bff").unwrap(),
            "installp -aXYgd /tmp/d/chef.bff all"
        );
        assert_eq!(caps.normalize_path("/tmp\\odd"), "/tmp\\odd");
        assert_eq!(caps.join_path("/tmp/d/", "workstation.rb"), "/tmp/d/workstation.rb");
        assert_eq!(caps.version_manifest_path(), "/opt/chef/version-manifest.json");
    }

    #[test]
    fn test_windows_commands() {
        let caps = WindowsCapabilities;
        assert!(caps.chown("C:/t", "admin").is_none());
        assert_eq!(
            caps.install_package("C:/Temp/x/chef-client-14.4.22-1-x64.msi").unwrap(),
            "cmd /c msiexec /package C:\\Temp\\x\\chef-client-14.4.22-1-x64.msi /quiet"
        );
        assert_eq!(
            caps.delete_file("C:/t/run-report.json"),
            "If (Test-Path C:/t/run-report.json) { Remove-Item -Force -Path C:/t/run-report.json }"
        );
        assert_eq!(caps.delete_directory("C:/t"), "Remove-Item -Recurse -Force -Path C:/t");
        assert_eq!(caps.normalize_path("C:\\Users\\a\\Temp"), "C:/Users/a/Temp");
        assert_eq!(caps.join_path("C:\\w", "a.tgz"), "C:\\w\\a.tgz");
        assert_eq!(caps.join_path("C:/Users/a/Temp/", "a.tgz"), "C:/Users/a/Temp/a.tgz");
        assert_eq!(caps.join_path("C:", "a.tgz"), "C:\\a.tgz");
        assert!(caps.make_temp_dir().contains("[System.Guid]::NewGuid()"));
        assert_eq!(caps.version_manifest_path(), "c:\\opscode\\chef\\version-manifest.json");
    }

    #[test]
    fn test_macos_uses_fixed_installer_dir() {
        let caps = MacOsCapabilities;
        assert_eq!(
            caps.make_temp_dir(),
            "mkdir -p /tmp/chef-installer && chmod 777 /tmp/chef-installer && echo /tmp/chef-installer"
        );
        assert!(
            caps.install_package("/tmp/chef-installer/chef.dmg")
                .unwrap()
                .contains("hdiutil attach /tmp/chef-installer/chef.dmg")
        );
    }
}
