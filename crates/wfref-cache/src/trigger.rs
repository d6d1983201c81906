//! Debounced change detection
//!
//! Each document has at most one pending trigger. An edit replaces the pending
//! one and restarts the quiet period; when the period elapses the document is
//! re-scanned and its references handed to [`ActionCache::resolve_async`].
//! Opening or focusing a document scans it immediately.

use crate::cache::{ActionCache, ResolveBatch};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};
use wfref_config::TriggerConfig;
use wfref_foundation::{ActionIdentity, CoreError, CoreResult};

/// Structural-text parser collaborator: finds the raw `uses:` values in a
/// document
#[async_trait]
pub trait ReferenceExtractor: Send + Sync {
    async fn extract(&self, document: &Path) -> CoreResult<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct TriggerSettings {
    /// Quiet period after the last edit
    pub debounce: Duration,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self::from(&TriggerConfig::default())
    }
}

impl From<&TriggerConfig> for TriggerSettings {
    fn from(config: &TriggerConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
        }
    }
}

struct Pending {
    generation: u64,
    handle: AbortHandle,
}

struct TriggerInner {
    cache: ActionCache,
    extractor: Arc<dyn ReferenceExtractor>,
    settings: TriggerSettings,
    pending: DashMap<PathBuf, Pending>,
    next_generation: AtomicU64,
    scans: AtomicU64,
    runtime: Handle,
}

/// Turns editor events into cache resolutions
#[derive(Clone)]
pub struct ChangeTrigger {
    inner: Arc<TriggerInner>,
}

impl std::fmt::Debug for ChangeTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTrigger")
            .field("pending", &self.inner.pending.len())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl ChangeTrigger {
    /// Create a trigger bound to the current tokio runtime
    pub fn new(
        cache: ActionCache,
        extractor: Arc<dyn ReferenceExtractor>,
        settings: TriggerSettings,
    ) -> CoreResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            CoreError::internal(format!("ChangeTrigger needs a tokio runtime: {}", e))
        })?;
        Ok(Self {
            inner: Arc::new(TriggerInner {
                cache,
                extractor,
                settings,
                pending: DashMap::new(),
                next_generation: AtomicU64::new(1),
                scans: AtomicU64::new(0),
                runtime,
            }),
        })
    }

    pub fn cache(&self) -> &ActionCache {
        &self.inner.cache
    }

    /// Schedule a scan after the quiet period, replacing any pending one
    pub fn on_edit(&self, document: &Path) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let replaced = match self.inner.pending.entry(document.to_path_buf()) {
            Entry::Occupied(mut entry) => {
                let handle = self.spawn_debounced(document.to_path_buf(), generation);
                Some(entry.insert(Pending { generation, handle }))
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn_debounced(document.to_path_buf(), generation);
                entry.insert(Pending { generation, handle });
                None
            }
        };

        if let Some(previous) = replaced {
            previous.handle.abort();
            debug!(document = %document.display(), "Debounce window restarted");
        }
    }

    /// Scan a newly opened document right away
    pub fn on_open(&self, document: &Path) -> JoinHandle<ResolveBatch> {
        self.immediate(document)
    }

    /// Scan a document that gained focus right away
    pub fn on_focus(&self, document: &Path) -> JoinHandle<ResolveBatch> {
        self.immediate(document)
    }

    /// Drop the pending trigger of a document; returns true if one existed
    pub fn cancel(&self, document: &Path) -> bool {
        match self.inner.pending.remove(document) {
            Some((_, pending)) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Documents with a trigger waiting for its quiet period
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Scans performed so far
    pub fn scan_count(&self) -> u64 {
        self.inner.scans.load(Ordering::Relaxed)
    }

    /// Extract the references of `document` and resolve them now
    pub async fn scan(&self, document: &Path) -> ResolveBatch {
        self.inner.scan(document).await
    }

    fn immediate(&self, document: &Path) -> JoinHandle<ResolveBatch> {
        self.cancel(document);
        let inner = Arc::clone(&self.inner);
        let document = document.to_path_buf();
        self.inner
            .runtime
            .spawn(async move { inner.scan(&document).await })
    }

    fn spawn_debounced(&self, document: PathBuf, generation: u64) -> AbortHandle {
        let inner = Arc::clone(&self.inner);
        let window = self.inner.settings.debounce;
        self.inner
            .runtime
            .spawn(async move {
                tokio::time::sleep(window).await;
                let current = inner
                    .pending
                    .remove_if(&document, |_, pending| pending.generation == generation)
                    .is_some();
                if current {
                    inner.scan(&document).await;
                }
            })
            .abort_handle()
    }
}

impl TriggerInner {
    async fn scan(&self, document: &Path) -> ResolveBatch {
        self.scans.fetch_add(1, Ordering::Relaxed);

        let raw = match self.extractor.extract(document).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(document = %document.display(), error = %e, "Reference extraction failed");
                return ResolveBatch::default();
            }
        };

        let identities: BTreeSet<ActionIdentity> = raw
            .iter()
            .filter_map(|reference| match ActionIdentity::parse(reference) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    debug!(reference = %reference, error = %e, "Ignoring unresolvable reference");
                    None
                }
            })
            .collect();

        debug!(
            document = %document.display(),
            references = raw.len(),
            identities = identities.len(),
            "Scanned document"
        );

        for identity in &identities {
            self.cache.get(identity);
        }
        self.cache.resolve_async(identities)
    }
}
