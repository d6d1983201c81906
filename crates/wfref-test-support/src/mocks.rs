//! Mock implementations for testing

use async_trait::async_trait;
use mockall::mock;
use std::io;
use std::path::Path;
use wfref_cache::ReferenceExtractor;
use wfref_foundation::{ActionDescriptor, ActionIdentity, CoreResult, ResolutionError};
use wfref_resolver::{DescriptorFetcher, LocalFileResolver, VersionFetcher};

mock! {
    pub DescriptorFetcher {}

    #[async_trait]
    impl DescriptorFetcher for DescriptorFetcher {
        async fn fetch(&self, identity: &ActionIdentity) -> Result<ActionDescriptor, ResolutionError>;
    }
}

mock! {
    pub LocalFileResolver {}

    #[async_trait]
    impl LocalFileResolver for LocalFileResolver {
        async fn read(&self, relative: &str) -> io::Result<Option<String>>;
    }
}

mock! {
    pub VersionFetcher {}

    #[async_trait]
    impl VersionFetcher for VersionFetcher {
        async fn latest_version(&self, slug: &str) -> Result<Option<String>, ResolutionError>;
    }
}

mock! {
    pub ReferenceExtractor {}

    #[async_trait]
    impl ReferenceExtractor for ReferenceExtractor {
        async fn extract(&self, document: &Path) -> CoreResult<Vec<String>>;
    }
}

/// Create a mock fetcher for testing
pub fn mock_fetcher() -> MockDescriptorFetcher {
    MockDescriptorFetcher::new()
}

/// Create a mock local resolver that finds nothing
pub fn empty_local_resolver() -> MockLocalFileResolver {
    let mut resolver = MockLocalFileResolver::new();
    resolver.expect_read().returning(|_| Ok(None));
    resolver
}

/// Create a mock release lookup for testing
pub fn mock_versions() -> MockVersionFetcher {
    MockVersionFetcher::new()
}

/// Create a mock extractor for testing
pub fn mock_extractor() -> MockReferenceExtractor {
    MockReferenceExtractor::new()
}
