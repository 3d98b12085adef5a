//! Agent package lookup and download.

use crate::errors::{ApplyError, Result};
use crate::types::Platform;
use crate::util::basename;
use reqwest::{Client, header};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const OMNITRUCK_BASE: &str = "https://omnitruck.chef.io";

/// Download coordinates for one agent package.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactInfo {
    pub url: String,
    pub sha256: String,
    pub version: String,
}

/// Platform terms understood by the package repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageQuery {
    pub platform: String,
    pub platform_version: String,
    pub architecture: String,
}

impl PackageQuery {
    pub fn for_platform(platform: &Platform) -> Self {
        let mut query = Self {
            platform: platform.name.clone(),
            platform_version: platform.release.clone(),
            architecture: normalize_arch(&platform.name, &platform.arch),
        };
        match platform.name.as_str() {
            name if name.contains("windows") => query.platform = "windows".to_string(),
            "redhat" | "centos" => query.platform = "el".to_string(),
            "suse" => query.platform = "sles".to_string(),
            "amazon" => {
                query.platform = "el".to_string();
                // Amazon Linux 1 releases are year-numbered
                let year = platform
                    .release
                    .split('.')
                    .next()
                    .and_then(|r| r.parse::<u32>().ok())
                    .unwrap_or(0);
                query.platform_version = if year > 2010 { "6" } else { "7" }.to_string();
            }
            "mac_os_x" | "aix" => {
                query.platform_version = major_minor(&platform.release);
            }
            _ => {}
        }
        query
    }
}

/// Map `uname -m` style machine names onto repository architectures.
fn normalize_arch(platform_name: &str, arch: &str) -> String {
    // uname -m on AIX prints the machine serial
    if platform_name == "aix" {
        return "powerpc".to_string();
    }
    match arch {
        "arm64" => "aarch64".to_string(),
        "amd64" | "x64" => "x86_64".to_string(),
        "i86pc" | "i686" | "i586" | "i486" | "x86" => "i386".to_string(),
        sparc if sparc.starts_with("sun4") => "sparc".to_string(),
        other => other.to_string(),
    }
}

/// `13.4.1` -> `13.4`, `7.2.0.0` -> `7.2`.
fn major_minor(release: &str) -> String {
    release.split('.').take(2).collect::<Vec<_>>().join(".")
}

/// A package downloaded for one install. The file and its directory are
/// removed when this is dropped.
#[derive(Debug)]
pub struct LocalArtifact {
    path: PathBuf,
    _dir: TempDir,
}

impl LocalArtifact {
    /// Write `bytes` as `file_name` inside a fresh directory under `parent`.
    pub fn write(parent: &Path, file_name: &str, bytes: &[u8]) -> Result<Self> {
        std::fs::create_dir_all(parent)
            .map_err(|e| ApplyError::local_io(format!("creating {}", parent.display()), e))?;
        let dir = tempfile::Builder::new()
            .prefix("artifact-")
            .tempdir_in(parent)
            .map_err(|e| {
                ApplyError::local_io(format!("creating temp dir in {}", parent.display()), e)
            })?;
        let path = dir.path().join(file_name);
        std::fs::write(&path, bytes)
            .map_err(|e| ApplyError::local_io(format!("writing {}", path.display()), e))?;
        Ok(Self { path, _dir: dir })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub trait ArtifactSource: Send + Sync {
    fn resolve(&self, platform: &Platform) -> impl Future<Output = Result<ArtifactInfo>> + Send;

    /// Download the package to a scratch location owned by the caller.
    fn fetch(&self, artifact: &ArtifactInfo) -> impl Future<Output = Result<LocalArtifact>> + Send;
}

/// Stable-channel packages from the public Omnitruck service.
pub struct OmnitruckSource {
    client: Client,
    base_url: String,
    download_dir: PathBuf,
}

impl OmnitruckSource {
    pub fn new(cache_root: &Path) -> Self {
        Self::with_base_url(cache_root, OMNITRUCK_BASE)
    }

    pub fn with_base_url(cache_root: &Path, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            download_dir: cache_root.join("downloads"),
        }
    }

    pub fn metadata_url(&self, query: &PackageQuery) -> String {
        format!(
            "{}/stable/chef/metadata?p={}&pv={}&m={}&v=latest",
            self.base_url.trim_end_matches('/'),
            query.platform,
            query.platform_version,
            query.architecture
        )
    }

    fn user_agent() -> String {
        format!("rapply/{}", env!("CARGO_PKG_VERSION"))
    }
}

impl ArtifactSource for OmnitruckSource {
    async fn resolve(&self, platform: &Platform) -> Result<ArtifactInfo> {
        let query = PackageQuery::for_platform(platform);
        let url = self.metadata_url(&query);
        let lookup_err = |message: String| ApplyError::ArtifactLookup {
            platform: format!(
                "{} {} {}",
                query.platform, query.platform_version, query.architecture
            ),
            message,
        };

        debug!(url = %url, "Resolving agent package");
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, Self::user_agent())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| lookup_err(e.to_string()))?;

        let info = response
            .json::<ArtifactInfo>()
            .await
            .map_err(|e| lookup_err(e.to_string()))?;
        info!(version = %info.version, url = %info.url, "Resolved agent package");
        Ok(info)
    }

    async fn fetch(&self, artifact: &ArtifactInfo) -> Result<LocalArtifact> {
        let file_name = basename(artifact.url.split('?').next().unwrap_or(&artifact.url));
        let download_err = |message: String| ApplyError::ArtifactDownload {
            url: artifact.url.clone(),
            message,
        };

        info!(url = %artifact.url, "Downloading agent package");
        let bytes = self
            .client
            .get(&artifact.url)
            .header(header::USER_AGENT, Self::user_agent())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_err(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| download_err(e.to_string()))?;

        verify_checksum(&self.download_dir.join(file_name), &bytes, &artifact.sha256)?;
        let local = LocalArtifact::write(&self.download_dir, file_name, &bytes)?;
        debug!(path = %local.path().display(), size = bytes.len(), "Agent package downloaded");
        Ok(local)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn verify_checksum(path: &Path, bytes: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(bytes);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ApplyError::ArtifactChecksum {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}
