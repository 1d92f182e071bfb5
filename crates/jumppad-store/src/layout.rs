use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "state.json";

/// Directory layout under the Jumppad home (`$HOME/.jumppad` by default).
///
/// Subdirectories are created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct JumppadLayout {
    root: PathBuf,
}

impl JumppadLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    #[inline]
    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    /// Exclusive lock held by mutating commands.
    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir().join(".lock")
    }

    #[inline]
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// Per-cluster directory holding kubeconfig or Nomad config files.
    #[inline]
    pub fn cluster_config_dir(&self, cluster: &str) -> PathBuf {
        self.config_dir().join(cluster)
    }

    #[inline]
    pub fn certs_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    #[inline]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Named data folder shared with containers.
    #[inline]
    pub fn data_path(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }

    /// Cache of fetched module sources and remote copy sources.
    #[inline]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    #[inline]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    #[inline]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.state_dir())?;
        fs::create_dir_all(self.config_dir())?;
        fs::create_dir_all(self.certs_dir())?;
        fs::create_dir_all(self.data_dir())?;
        fs::create_dir_all(self.cache_dir())?;
        fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = JumppadLayout::new("/tmp/jumppad-test");
        assert_eq!(
            layout.state_path(),
            PathBuf::from("/tmp/jumppad-test/state/state.json")
        );
        assert_eq!(
            layout.lock_file(),
            PathBuf::from("/tmp/jumppad-test/state/.lock")
        );
        assert_eq!(
            layout.cluster_config_dir("k"),
            PathBuf::from("/tmp/jumppad-test/config/k")
        );
        assert_eq!(
            layout.data_path("shared"),
            PathBuf::from("/tmp/jumppad-test/data/shared")
        );
        assert_eq!(
            layout.config_file(),
            PathBuf::from("/tmp/jumppad-test/config.toml")
        );
    }

    #[test]
    fn initialize_creates_all_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = JumppadLayout::new(dir.path());
        layout.initialize().unwrap();

        assert!(layout.state_dir().is_dir());
        assert!(layout.config_dir().is_dir());
        assert!(layout.certs_dir().is_dir());
        assert!(layout.data_dir().is_dir());
        assert!(layout.cache_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = JumppadLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        assert!(layout.state_dir().is_dir());
    }
}
