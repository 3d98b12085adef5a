use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Scratch directory holding a config file and a policy archive, so the
/// binary never reads or writes the real `~/.rapply`.
pub struct TestWorkspace {
    pub dir: TempDir,
    pub config: PathBuf,
    pub archive: PathBuf,
    pub log_file: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        crate::test_log!("FIXTURE: Creating rapply workspace");

        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = dir.path().join("config.toml");
        let archive = dir.path().join("policy-5e1a.tgz");
        let log_file = dir.path().join("logs").join("rapply.log");
        let cache = dir.path().join("cache");

        fs::write(
            &config,
            format!(
                "[log]\nlevel = \"info\"\nlocation = {:?}\n\n[cache]\npath = {:?}\n",
                log_file.display().to_string(),
                cache.display().to_string(),
            ),
        )
        .expect("Failed to write config.toml");
        fs::write(&archive, b"archive").expect("Failed to write archive");

        Self {
            dir,
            config,
            archive,
            log_file,
        }
    }
}
