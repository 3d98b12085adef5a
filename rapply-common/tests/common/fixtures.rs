use rapply_common::pipeline::Reporter;
use rapply_common::{
    ActionEvent, ActionObserver, ApplyError, ArtifactInfo, ArtifactSource, LocalArtifact, Platform,
};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// A local policy archive file inside `dir`.
pub fn policy_archive(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("policy-7d2f.tgz");
    std::fs::write(&path, b"archive").expect("write archive");
    path
}

/// Collects action events.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ActionEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ActionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(ActionEvent::name).collect()
    }
}

impl ActionObserver for RecordingObserver {
    fn on_event(&self, event: &ActionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Collects reporter calls as `(kind, message)`.
#[derive(Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingReporter {
    pub fn messages(&self) -> Vec<(&'static str, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn update(&self, message: &str) {
        self.messages.lock().unwrap().push(("update", message.to_string()));
    }

    fn success(&self, message: &str) {
        self.messages.lock().unwrap().push(("success", message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages.lock().unwrap().push(("error", message.to_string()));
    }
}

/// Artifact source that never touches the network.
pub struct StubArtifactSource {
    dir: TempDir,
    version: String,
    pub resolves: AtomicUsize,
    fetched: Mutex<Vec<PathBuf>>,
    fail_lookup: bool,
}

impl StubArtifactSource {
    pub fn new(version: &str) -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
            version: version.to_string(),
            resolves: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
            fail_lookup: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_lookup: true,
            ..Self::new("0.0.0")
        }
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    /// Local paths handed out by `fetch`, in order.
    pub fn fetched_paths(&self) -> Vec<PathBuf> {
        self.fetched.lock().unwrap().clone()
    }
}

impl ArtifactSource for StubArtifactSource {
    async fn resolve(&self, platform: &Platform) -> rapply_common::Result<ArtifactInfo> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup {
            return Err(ApplyError::ArtifactLookup {
                platform: platform.name.clone(),
                message: "404 Not Found".to_string(),
            });
        }
        let file = if platform.os_family().is_windows() {
            format!("chef-client-{}-1-x64.msi", self.version)
        } else {
            format!("chef-{}-1.el7.x86_64.rpm", self.version)
        };
        Ok(ArtifactInfo {
            url: format!("https://packages.example.com/stable/{file}"),
            sha256: String::new(),
            version: self.version.clone(),
        })
    }

    async fn fetch(&self, artifact: &ArtifactInfo) -> rapply_common::Result<LocalArtifact> {
        let name = artifact.url.rsplit('/').next().unwrap_or("package");
        let local = LocalArtifact::write(self.dir.path(), name, b"package")?;
        self.fetched.lock().unwrap().push(local.path().to_path_buf());
        Ok(local)
    }
}
