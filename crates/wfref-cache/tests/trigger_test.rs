use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use wfref_cache::{ActionCache, CacheSettings, ChangeTrigger, TriggerSettings};
use wfref_foundation::CoreError;
use wfref_test_support::mocks::mock_extractor;
use wfref_test_support::{identity, MemoryLocalResolver, StaticExtractor, StubFetcher};

struct Fixture {
    fetcher: Arc<StubFetcher>,
    extractor: Arc<StaticExtractor>,
    trigger: ChangeTrigger,
}

fn fixture() -> Fixture {
    let fetcher = Arc::new(StubFetcher::new());
    let extractor = Arc::new(StaticExtractor::new());
    extractor.set("ci.yml", &["actions/checkout@v4", "actions/setup-java@main"]);
    extractor.set("release.yml", &["actions/upload-artifact@v4"]);

    let cache = ActionCache::new(
        fetcher.clone(),
        Arc::new(MemoryLocalResolver::new()),
        CacheSettings::default(),
    )
    .unwrap();
    let trigger = ChangeTrigger::new(
        cache,
        extractor.clone(),
        TriggerSettings {
            debounce: Duration::from_millis(1000),
        },
    )
    .unwrap();

    Fixture {
        fetcher,
        extractor,
        trigger,
    }
}

#[tokio::test(start_paused = true)]
async fn test_edit_burst_fires_once_after_quiet_period() {
    let f = fixture();
    let doc = Path::new("ci.yml");

    f.trigger.on_edit(doc);
    sleep(Duration::from_millis(200)).await;
    f.trigger.on_edit(doc);
    sleep(Duration::from_millis(200)).await;
    f.trigger.on_edit(doc);
    assert_eq!(f.trigger.pending_count(), 1);

    sleep(Duration::from_millis(999)).await;
    assert_eq!(f.extractor.calls(), 0);

    sleep(Duration::from_millis(2)).await;
    assert_eq!(f.extractor.calls(), 1);
    assert_eq!(f.trigger.pending_count(), 0);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(f.extractor.calls(), 1);
    assert_eq!(f.fetcher.calls("actions/checkout@v4"), 1);
    assert_eq!(f.fetcher.calls("actions/setup-java@main"), 1);
    assert!(f.trigger.cache().get(&identity("actions/checkout@v4")).is_resolved());
}

#[tokio::test(start_paused = true)]
async fn test_documents_debounce_independently() {
    let f = fixture();

    f.trigger.on_edit(Path::new("ci.yml"));
    sleep(Duration::from_millis(500)).await;
    f.trigger.on_edit(Path::new("release.yml"));
    assert_eq!(f.trigger.pending_count(), 2);

    sleep(Duration::from_millis(501)).await;
    assert_eq!(f.extractor.calls(), 1);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(f.extractor.calls(), 2);
    assert_eq!(f.fetcher.calls("actions/upload-artifact@v4"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_focus_scans_immediately_and_cancels_pending_edit() {
    let f = fixture();
    let doc = Path::new("ci.yml");

    f.trigger.on_edit(doc);
    let batch = f.trigger.on_focus(doc).await.unwrap();
    assert_eq!(batch.dispatched(), 2);
    assert_eq!(f.extractor.calls(), 1);
    assert_eq!(f.trigger.pending_count(), 0);
    batch.wait().await;

    sleep(Duration::from_secs(3)).await;
    assert_eq!(f.extractor.calls(), 1);
}

#[tokio::test]
async fn test_open_resolves_stale_references_only() {
    let f = fixture();
    let doc = Path::new("ci.yml");

    f.trigger.on_open(doc).await.unwrap().wait().await;
    assert_eq!(f.fetcher.total_calls(), 2);

    // Everything is fresh on the second visit
    let batch = f.trigger.on_focus(doc).await.unwrap();
    assert!(batch.is_empty());
    assert_eq!(f.extractor.calls(), 2);
    assert_eq!(f.fetcher.total_calls(), 2);
}

#[tokio::test]
async fn test_unresolvable_references_are_filtered() {
    let f = fixture();
    f.extractor.set(
        "mixed.yml",
        &[
            "actions/checkout@v4",
            "actions/checkout@v4",
            "not-a-reference",
            "docker://alpine:3.19",
            "./.github/actions/missing",
        ],
    );

    let batch = f.trigger.scan(Path::new("mixed.yml")).await;
    assert_eq!(batch.dispatched(), 2);
    batch.wait().await;

    let cache = f.trigger.cache();
    assert!(cache.get(&identity("actions/checkout@v4")).is_resolved());
    assert!(!cache.get(&identity("./.github/actions/missing")).is_resolved());
    assert_eq!(cache.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drops_pending_trigger() {
    let f = fixture();
    let doc = Path::new("ci.yml");

    f.trigger.on_edit(doc);
    assert!(f.trigger.cancel(doc));
    assert!(!f.trigger.cancel(doc));

    sleep(Duration::from_secs(2)).await;
    assert_eq!(f.extractor.calls(), 0);
    assert_eq!(f.trigger.scan_count(), 0);
}

#[tokio::test]
async fn test_extraction_failure_is_absorbed() {
    let fetcher = Arc::new(StubFetcher::new());
    let cache = ActionCache::new(
        fetcher.clone(),
        Arc::new(MemoryLocalResolver::new()),
        CacheSettings::default(),
    )
    .unwrap();

    let mut extractor = mock_extractor();
    extractor
        .expect_extract()
        .times(1)
        .returning(|_| Err(CoreError::invalid_data("unterminated mapping")));

    let trigger =
        ChangeTrigger::new(cache, Arc::new(extractor), TriggerSettings::default()).unwrap();
    let batch = trigger.scan(Path::new("broken.yml")).await;

    assert!(batch.is_empty());
    assert_eq!(fetcher.total_calls(), 0);
}
