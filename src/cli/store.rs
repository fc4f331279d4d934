// Learned policy persistence
// (c) 2024 Ross Younger

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, trace};

/// Where the learned policy lives between runs
#[derive(Debug, Clone)]
pub(crate) struct PolicyStore {
    path: PathBuf,
}

impl PolicyStore {
    /// Resolves the configured model file, expanding `~`
    pub(crate) fn new(model_file: &str) -> Result<Self> {
        let path = if model_file.starts_with('~') {
            expanduser::expanduser(model_file)
                .with_context(|| format!("expanding model file path {model_file}"))?
        } else {
            PathBuf::from(model_file)
        };
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the saved snapshot, if there is one
    pub(crate) fn load(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(blob) => {
                debug!("read {} bytes from {}", blob.len(), self.path.display());
                Ok(Some(blob))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!("{} not present", self.path.display());
                Ok(None)
            }
            Err(e) => {
                Err(e).with_context(|| format!("reading saved policy {}", self.path.display()))
            }
        }
    }

    /// Replaces the saved snapshot.
    ///
    /// The new snapshot is written alongside and renamed into place, so a reader never sees
    /// a partial file.
    pub(crate) fn save(&self, blob: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, blob).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        debug!("saved policy to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::PolicyStore;
    use crate::policy::{PolicyConfig, PolicyModel, Stage};

    #[test]
    fn missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.json");
        let store = PolicyStore::new(path.to_str().unwrap()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/policy.json");
        let store = PolicyStore::new(path.to_str().unwrap()).unwrap();
        store.save(b"{}").unwrap();
        assert_eq!(store.load().unwrap().unwrap(), b"{}");
        assert!(!dir.path().join("a/b/policy.json.tmp").exists());
    }

    #[test]
    fn policy_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let store = PolicyStore::new(path.to_str().unwrap()).unwrap();
        let config = PolicyConfig::default();
        let policy = PolicyModel::new(config);
        store.save(&policy.serialize().unwrap()).unwrap();

        let blob = store.load().unwrap();
        let restored = PolicyModel::restore_or_new(blob.as_deref(), config);
        assert_eq!(restored.estimator(), policy.estimator());
        assert_eq!(restored.stage(), Stage::Untrained);
    }

    #[test]
    fn tilde_expands() {
        let store = PolicyStore::new("~/x.json").unwrap();
        assert!(!store.path().starts_with("~"));
        assert!(store.path().ends_with("x.json"));
    }
}
