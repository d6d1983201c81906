//! Fixture builders

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wfref_foundation::{ActionDescriptor, ActionIdentity, ParameterMap};

/// Parse an identity that the test knows to be valid
pub fn identity(raw: &str) -> ActionIdentity {
    ActionIdentity::parse(raw).unwrap_or_else(|e| panic!("invalid test identity '{}': {}", raw, e))
}

/// Descriptor from `(name, description)` pairs
pub fn descriptor(inputs: &[(&str, &str)], outputs: &[(&str, &str)]) -> ActionDescriptor {
    let map = |pairs: &[(&str, &str)]| -> ParameterMap {
        pairs
            .iter()
            .map(|(name, description)| (name.to_string(), description.to_string()))
            .collect()
    };
    ActionDescriptor::new(map(inputs), map(outputs))
}

/// Throwaway repository with workflow and action files
pub struct WorkflowRepo {
    dir: TempDir,
}

impl WorkflowRepo {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap_or_else(|e| panic!("failed to create temp dir: {}", e)),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` at a repository-relative path, creating parents
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .unwrap_or_else(|e| panic!("failed to create {}: {}", parent.display(), e));
        }
        std::fs::write(&path, content)
            .unwrap_or_else(|e| panic!("failed to write {}: {}", path.display(), e));
        path
    }
}

impl Default for WorkflowRepo {
    fn default() -> Self {
        Self::new()
    }
}
