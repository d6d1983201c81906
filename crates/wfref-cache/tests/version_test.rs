use pretty_assertions::assert_eq;
use std::sync::Arc;
use wfref_cache::{ActionCache, CacheSettings, RecordChange};
use wfref_foundation::ResolutionError;
use wfref_test_support::mocks::{mock_versions, MockVersionFetcher};
use wfref_test_support::{identity, MemoryLocalResolver, StubFetcher};

fn cache_with(versions: MockVersionFetcher) -> ActionCache {
    let local = MemoryLocalResolver::new();
    local.insert(".github/actions/build/action.yml", "inputs:\n  target: {}\n");
    ActionCache::with_versions(
        Arc::new(StubFetcher::new()),
        Arc::new(local),
        Arc::new(versions),
        CacheSettings::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_latest_release_is_shared_per_repository() {
    let mut versions = mock_versions();
    versions
        .expect_latest_version()
        .withf(|slug| slug.eq_ignore_ascii_case("actions/setup-java"))
        .times(1)
        .returning(|_| Ok(Some("v4.0.0".to_string())));
    let cache = cache_with(versions);

    let old = identity("actions/setup-java@v3");
    let current = identity("actions/setup-java@v4");
    cache.resolve_async([old.clone()]).wait().await;
    cache.resolve_async([current.clone()]).wait().await;

    let old_record = cache.get(&old);
    assert_eq!(old_record.latest_version().as_deref(), Some("v4.0.0"));
    assert!(old_record.is_outdated());
    assert!(!cache.get(&current).is_outdated());
}

#[tokio::test]
async fn test_local_actions_have_no_release() {
    let mut versions = mock_versions();
    versions.expect_latest_version().times(0);
    let cache = cache_with(versions);

    let build = identity("./.github/actions/build");
    cache.resolve_async([build.clone()]).wait().await;

    let record = cache.get(&build);
    assert!(record.is_resolved());
    assert_eq!(record.latest_version(), None);
    assert!(!record.is_outdated());
}

#[tokio::test]
async fn test_failed_release_lookup_keeps_descriptor_and_is_retried() {
    let mut versions = mock_versions();
    versions
        .expect_latest_version()
        .times(2)
        .returning(|_| Err(ResolutionError::network("HTTP 403: Forbidden")));
    let cache = cache_with(versions);

    let checkout = identity("actions/checkout@v4");
    let older = identity("actions/checkout@v3");
    cache.resolve_async([checkout.clone()]).wait().await;
    cache.resolve_async([older.clone()]).wait().await;

    let record = cache.get(&checkout);
    assert!(record.is_resolved());
    assert_eq!(record.last_error(), None);
    assert_eq!(record.latest_version(), None);
}

#[tokio::test]
async fn test_reload_asks_for_the_latest_release_again() {
    let mut versions = mock_versions();
    let mut sequence = mockall::Sequence::new();
    versions
        .expect_latest_version()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(Some("v4.0.0".to_string())));
    versions
        .expect_latest_version()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(Some("v5.0.0".to_string())));
    let cache = cache_with(versions);
    let mut events = cache.subscribe();

    let id = identity("actions/checkout@v4");
    cache.resolve_async([id.clone()]).wait().await;
    assert!(!cache.get(&id).is_outdated());

    let record = cache.reload(&id).await.unwrap();
    assert_eq!(record.latest_version().as_deref(), Some("v5.0.0"));
    assert!(record.is_outdated());

    // First resolution, then the release change
    assert_eq!(events.try_recv().unwrap().change, RecordChange::Resolved);
    assert_eq!(events.try_recv().unwrap().change, RecordChange::Resolved);
}

#[tokio::test]
async fn test_latest_release_survives_snapshot_round_trip() {
    let mut versions = mock_versions();
    versions
        .expect_latest_version()
        .times(1)
        .returning(|_| Ok(Some("v4.0.0".to_string())));
    let source = cache_with(versions);
    let id = identity("actions/setup-java@v3");
    source.resolve_async([id.clone()]).wait().await;

    let snapshot = source.export_snapshot();
    assert!(snapshot.to_json().unwrap().contains("\"latestVersion\": \"v4.0.0\""));

    let target = cache_with(mock_versions());
    target.import_snapshot(snapshot);
    assert_eq!(target.get(&id).latest_version().as_deref(), Some("v4.0.0"));
    assert!(target.get(&id).is_outdated());
}
