//! Deterministic collaborator stubs with call accounting
//!
//! Unlike the mockall mocks these are shared behind `Arc` and inspected after
//! the fact, which suits concurrency tests where the number of calls is the
//! property under test.

use crate::fixtures::descriptor;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wfref_cache::ReferenceExtractor;
use wfref_foundation::{ActionDescriptor, ActionIdentity, CoreResult, ResolutionError};
use wfref_resolver::{DescriptorFetcher, LocalFileResolver};

type FetchResult = Result<ActionDescriptor, ResolutionError>;

/// Fetcher answering from a script, optionally after a delay
pub struct StubFetcher {
    responses: Mutex<HashMap<String, FetchResult>>,
    fallback: Mutex<FetchResult>,
    delay: Mutex<Duration>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl Default for StubFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StubFetcher {
    /// Every identity resolves to one input and one output
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Ok(descriptor(
                &[("input", "An input")],
                &[("output", "An output")],
            ))),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Script the answer for one identity key
    pub fn respond(&self, key: &str, result: FetchResult) {
        self.responses.lock().insert(key.to_string(), result);
    }

    /// Script the answer for every identity without its own script
    pub fn respond_by_default(&self, result: FetchResult) {
        *self.fallback.lock() = result;
    }

    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DescriptorFetcher for StubFetcher {
    async fn fetch(&self, identity: &ActionIdentity) -> FetchResult {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().entry(identity.key().to_string()).or_insert(0) += 1;

        // The answer is fixed when the call starts, not when the delay ends
        let scripted = self.responses.lock().get(identity.key()).cloned();
        let result = scripted.unwrap_or_else(|| self.fallback.lock().clone());

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

/// Repository tree held in memory; files can come and go between lookups
#[derive(Default)]
pub struct MemoryLocalResolver {
    files: Mutex<HashMap<String, String>>,
    reads: AtomicUsize,
}

impl MemoryLocalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, relative: &str, content: &str) {
        self.files
            .lock()
            .insert(relative.to_string(), content.to_string());
    }

    pub fn remove(&self, relative: &str) {
        self.files.lock().remove(relative);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalFileResolver for MemoryLocalResolver {
    async fn read(&self, relative: &str) -> io::Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.lock().get(relative).cloned())
    }
}

/// Extractor returning fixed references per document
#[derive(Default)]
pub struct StaticExtractor {
    documents: Mutex<HashMap<PathBuf, Vec<String>>>,
    calls: AtomicUsize,
}

impl StaticExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, document: impl Into<PathBuf>, references: &[&str]) {
        self.documents.lock().insert(
            document.into(),
            references.iter().map(|r| r.to_string()).collect(),
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceExtractor for StaticExtractor {
    async fn extract(&self, document: &Path) -> CoreResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .documents
            .lock()
            .get(document)
            .cloned()
            .unwrap_or_default())
    }
}
