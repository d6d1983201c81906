//! Local descriptor lookup
//!
//! Local identities (`./.github/actions/setup`) are resolved against the
//! repository tree, never over the network. Negative results are not cached:
//! every lookup goes back to the resolver.

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use wfref_foundation::{ActionDescriptor, ActionIdentity, ResolutionError};

/// Read access to files inside the repository
#[async_trait]
pub trait LocalFileResolver: Send + Sync {
    /// Content of a repository-relative file, `Ok(None)` if it does not exist
    async fn read(&self, relative: &str) -> io::Result<Option<String>>;
}

/// [`LocalFileResolver`] over a directory on disk
#[derive(Debug, Clone)]
pub struct FsLocalResolver {
    root: PathBuf,
}

impl FsLocalResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, relative: &str) -> io::Result<PathBuf> {
        let relative = Path::new(relative);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes repository root: {}", relative.display()),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl LocalFileResolver for FsLocalResolver {
    async fn read(&self, relative: &str) -> io::Result<Option<String>> {
        let path = self.path_of(relative)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }
        tokio::fs::read_to_string(&path).await.map(Some)
    }
}

/// Resolve a local identity through `resolver`, trying each descriptor
/// candidate in order
pub async fn resolve_local(
    resolver: &dyn LocalFileResolver,
    identity: &ActionIdentity,
) -> Result<ActionDescriptor, ResolutionError> {
    for path in identity.descriptor_paths() {
        match resolver.read(&path).await {
            Ok(Some(content)) => return ActionDescriptor::parse(identity.kind(), &content),
            Ok(None) => debug!(identity = %identity, path = %path, "Local descriptor candidate missing"),
            Err(e) => {
                return Err(ResolutionError::local_not_found(format!("{}: {}", path, e)));
            }
        }
    }
    Err(ResolutionError::local_not_found(identity.key()))
}
