//! Concurrent action cache with deduplicated background resolution
//!
//! ## Architecture
//!
//! - `records`: identity -> [`ActionRecord`], created lazily by [`ActionCache::get`]
//! - `in_flight`: identity -> ticket of the resolution currently running
//! - `latest`: repository slug -> latest release tag, shared by every ref of
//!   that repository and kept for the same TTL as descriptors
//! - resolution tasks run on the tokio runtime captured at construction and
//!   notify waiters through a `watch` channel
//!
//! A task commits its result and clears its in-flight entry while holding
//! that entry's lock, so callers either see the identity as in flight or see
//! the committed state, never a stale in-flight marker next to a fresh record.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wfref_cache::{ActionCache, CacheSettings};
//! use wfref_foundation::ActionIdentity;
//! use wfref_resolver::{FsLocalResolver, HttpFetcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ActionCache::new(
//!     Arc::new(HttpFetcher::github()?),
//!     Arc::new(FsLocalResolver::new(".")),
//!     CacheSettings::default(),
//! )?;
//!
//! let identity = ActionIdentity::parse("actions/checkout@v4")?;
//! cache.resolve_async([identity.clone()]).wait().await;
//! println!("{:?}", cache.get(&identity).state().inputs);
//! # Ok(())
//! # }
//! ```

use crate::events::{EventBus, RecordChange, RecordEvent, DEFAULT_EVENT_CAPACITY};
use crate::record::{ActionRecord, ParameterSide, ResolutionState};
use crate::snapshot::{from_millis, to_millis, CacheSnapshot, SnapshotRecord, SNAPSHOT_VERSION};
use chrono::{DateTime, SubsecRound, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use wfref_config::{resolution_span, CacheConfig};
use wfref_foundation::{ActionDescriptor, ActionIdentity, CoreError, CoreResult, ResolutionError};
use wfref_resolver::{resolve_local, DescriptorFetcher, LocalFileResolver, VersionFetcher};

/// Runtime settings for [`ActionCache`]
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Lifetime of a successful remote resolution
    pub ttl: Duration,
    /// Capacity of the record-changed channel
    pub event_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_seconds),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Counters describing cache contents and activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub records: usize,
    pub resolved: usize,
    pub fresh: usize,
    pub in_flight: usize,
    /// Lookups started, remote and local
    pub dispatched: u64,
    /// Requests satisfied by a lookup that was already running
    pub coalesced: u64,
}

/// Outcome of merging a snapshot into a live cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Identities absent from the live cache
    pub inserted: usize,
    /// Unresolved live records that took the persisted state
    pub merged: usize,
    /// Live records left untouched (resolved or in flight)
    pub kept_live: usize,
    /// Entries whose identity no longer parses
    pub invalid: usize,
}

/// Handle on the lookups started or joined by one `resolve_async` call
#[derive(Debug, Default)]
pub struct ResolveBatch {
    waiters: Vec<watch::Receiver<bool>>,
    dispatched: usize,
    coalesced: usize,
}

impl ResolveBatch {
    /// Lookups this call started
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Requests joined onto a lookup already in flight
    pub fn coalesced(&self) -> usize {
        self.coalesced
    }

    /// Nothing needed resolving
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Wait until every lookup in the batch has committed
    pub async fn wait(self) {
        for mut done in self.waiters {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

struct InFlight {
    ticket: u64,
    done: watch::Receiver<bool>,
}

struct LatestRelease {
    version: Option<String>,
    expires_at: DateTime<Utc>,
}

/// What one successful lookup learned
type Lookup = (ActionDescriptor, Option<String>);

struct CacheInner {
    records: DashMap<ActionIdentity, Arc<ActionRecord>>,
    in_flight: DashMap<ActionIdentity, InFlight>,
    fetcher: Arc<dyn DescriptorFetcher>,
    local: Arc<dyn LocalFileResolver>,
    versions: Option<Arc<dyn VersionFetcher>>,
    latest: DashMap<String, LatestRelease>,
    settings: CacheSettings,
    events: EventBus,
    runtime: Handle,
    next_ticket: AtomicU64,
    dispatched: AtomicU64,
    coalesced: AtomicU64,
}

/// Releases an in-flight slot and wakes its waiters even if the resolution
/// task is cancelled or panics before committing
struct InFlightGuard {
    inner: Arc<CacheInner>,
    identity: ActionIdentity,
    ticket: u64,
    done: watch::Sender<bool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let ticket = self.ticket;
        self.inner
            .in_flight
            .remove_if(&self.identity, |_, flight| flight.ticket == ticket);
        let _ = self.done.send(true);
    }
}

/// Cache of action records shared by every trigger in a session.
///
/// Cloning is cheap and yields a handle to the same cache.
#[derive(Clone)]
pub struct ActionCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for ActionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCache")
            .field("records", &self.inner.records.len())
            .field("in_flight", &self.inner.in_flight.len())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl ActionCache {
    /// Create a cache bound to the current tokio runtime
    pub fn new(
        fetcher: Arc<dyn DescriptorFetcher>,
        local: Arc<dyn LocalFileResolver>,
        settings: CacheSettings,
    ) -> CoreResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            CoreError::internal(format!("ActionCache needs a tokio runtime: {}", e))
        })?;
        Ok(Self::build(runtime, fetcher, local, None, settings))
    }

    /// Like [`ActionCache::new`], also looking up the latest release of every
    /// remote action it resolves
    pub fn with_versions(
        fetcher: Arc<dyn DescriptorFetcher>,
        local: Arc<dyn LocalFileResolver>,
        versions: Arc<dyn VersionFetcher>,
        settings: CacheSettings,
    ) -> CoreResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            CoreError::internal(format!("ActionCache needs a tokio runtime: {}", e))
        })?;
        Ok(Self::build(runtime, fetcher, local, Some(versions), settings))
    }

    /// Create a cache that spawns resolutions on `runtime`
    pub fn with_handle(
        runtime: Handle,
        fetcher: Arc<dyn DescriptorFetcher>,
        local: Arc<dyn LocalFileResolver>,
        settings: CacheSettings,
    ) -> Self {
        Self::build(runtime, fetcher, local, None, settings)
    }

    fn build(
        runtime: Handle,
        fetcher: Arc<dyn DescriptorFetcher>,
        local: Arc<dyn LocalFileResolver>,
        versions: Option<Arc<dyn VersionFetcher>>,
        settings: CacheSettings,
    ) -> Self {
        debug!(
            ttl_seconds = settings.ttl.as_secs(),
            versions = versions.is_some(),
            "ActionCache initialized"
        );
        Self {
            inner: Arc::new(CacheInner {
                records: DashMap::new(),
                in_flight: DashMap::new(),
                fetcher,
                local,
                versions,
                latest: DashMap::new(),
                events: EventBus::new(settings.event_capacity),
                settings,
                runtime,
                next_ticket: AtomicU64::new(1),
                dispatched: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Existing record for `identity`, or a new unresolved one. Never does I/O.
    pub fn get(&self, identity: &ActionIdentity) -> Arc<ActionRecord> {
        self.inner.record(identity)
    }

    /// Existing record without creating one
    pub fn peek(&self, identity: &ActionIdentity) -> Option<Arc<ActionRecord>> {
        self.inner
            .records
            .get(identity)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// All records, ordered by identity
    pub fn records(&self) -> Vec<Arc<ActionRecord>> {
        let mut records: Vec<_> = self
            .inner
            .records
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        records.sort_by(|a, b| a.identity().cmp(b.identity()));
        records
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    pub fn is_fresh(&self, identity: &ActionIdentity) -> bool {
        self.peek(identity)
            .is_some_and(|record| record.is_fresh(Utc::now()))
    }

    pub fn is_in_flight(&self, identity: &ActionIdentity) -> bool {
        self.inner.in_flight.contains_key(identity)
    }

    /// Start a background lookup for every identity that needs one.
    ///
    /// Fresh records and remote records with a permanent error are skipped.
    /// Identities already in flight are joined rather than re-fetched.
    /// Returns without waiting; use [`ResolveBatch::wait`] to await commits.
    pub fn resolve_async<I>(&self, identities: I) -> ResolveBatch
    where
        I: IntoIterator<Item = ActionIdentity>,
    {
        let now = Utc::now();
        let mut batch = ResolveBatch::default();

        for identity in identities {
            let record = self.inner.record(&identity);

            match self.inner.in_flight.entry(identity) {
                Entry::Occupied(entry) => {
                    debug!(identity = %entry.key(), "Resolution already in flight");
                    self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                    batch.coalesced += 1;
                    batch.waiters.push(entry.get().done.clone());
                }
                Entry::Vacant(entry) => {
                    if let Some(reason) = skip_reason(&record, now) {
                        debug!(identity = %entry.key(), reason, "Resolution skipped");
                        continue;
                    }
                    let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
                    let (done_tx, done_rx) = watch::channel(false);
                    let identity = entry.key().clone();
                    entry.insert(InFlight {
                        ticket,
                        done: done_rx.clone(),
                    });
                    batch.waiters.push(done_rx);
                    batch.dispatched += 1;
                    self.inner.spawn_resolution(identity, ticket, done_tx, "trigger");
                }
            }
        }

        if batch.dispatched > 0 {
            info!(
                dispatched = batch.dispatched,
                coalesced = batch.coalesced,
                "Dispatched action resolutions"
            );
        }
        batch
    }

    /// Force a fresh lookup of `identity`, ignoring freshness and any
    /// previous error, and wait for it.
    ///
    /// The failure is returned to the caller and also recorded on the record.
    /// A lookup already in flight is not cancelled; whichever commits last wins.
    pub async fn reload(
        &self,
        identity: &ActionIdentity,
    ) -> Result<Arc<ActionRecord>, ResolutionError> {
        self.inner.record(identity);
        self.inner.latest.remove(identity.slug());

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = watch::channel(false);
        self.inner.in_flight.insert(
            identity.clone(),
            InFlight {
                ticket,
                done: done_rx,
            },
        );

        let handle = self
            .inner
            .spawn_resolution(identity.clone(), ticket, done_tx, "reload");
        let outcome = handle
            .await
            .map_err(|e| ResolutionError::network(format!("resolution task failed: {}", e)))?;

        outcome.map(|()| self.inner.record(identity))
    }

    /// Drop the cached resolution of `identity`, keeping the user flags.
    ///
    /// A lookup already in flight still commits when it completes.
    pub fn invalidate(&self, identity: &ActionIdentity) {
        self.inner.latest.remove(identity.slug());
        let Some(record) = self.peek(identity) else {
            return;
        };
        let previous = record.replace_state(ResolutionState::default());
        if *previous != ResolutionState::default() {
            info!(identity = %identity, "Invalidated cached resolution");
            self.inner.events.emit(identity, RecordChange::Invalidated);
        }
    }

    /// Drop every record. Lookups in flight commit into fresh records.
    pub fn clear(&self) {
        // Collected in the same pass that drops them, so a record inserted
        // concurrently is either kept or reported
        let mut identities = Vec::new();
        self.inner.records.retain(|identity, _| {
            identities.push(identity.clone());
            false
        });
        self.inner.latest.clear();

        info!(records = identities.len(), "Cleared action cache");
        for identity in &identities {
            self.inner.events.emit(identity, RecordChange::Invalidated);
        }
    }

    /// Set the warning opt-out flag; returns true when it changed
    pub fn set_suppressed(&self, identity: &ActionIdentity, suppressed: bool) -> bool {
        let changed = self.inner.record(identity).set_suppressed(suppressed);
        if changed {
            self.inner
                .events
                .emit(identity, RecordChange::SuppressionChanged { suppressed });
        }
        changed
    }

    /// Flip the warning opt-out flag, returning the new value
    pub fn toggle_suppressed(&self, identity: &ActionIdentity) -> bool {
        let suppressed = self.inner.record(identity).toggle_suppressed();
        self.inner
            .events
            .emit(identity, RecordChange::SuppressionChanged { suppressed });
        suppressed
    }

    /// Opt a single input out of unknown-input warnings
    pub fn set_input_ignored(
        &self,
        identity: &ActionIdentity,
        name: &str,
        ignored: bool,
    ) -> bool {
        self.set_ignored(identity, ParameterSide::Input, name, ignored)
    }

    /// Opt a single output out of unknown-output warnings
    pub fn set_output_ignored(
        &self,
        identity: &ActionIdentity,
        name: &str,
        ignored: bool,
    ) -> bool {
        self.set_ignored(identity, ParameterSide::Output, name, ignored)
    }

    fn set_ignored(
        &self,
        identity: &ActionIdentity,
        side: ParameterSide,
        name: &str,
        ignored: bool,
    ) -> bool {
        let changed = self.inner.record(identity).set_ignored(side, name, ignored);
        if changed {
            self.inner.events.emit(
                identity,
                RecordChange::IgnoredChanged {
                    side,
                    name: name.to_string(),
                    ignored,
                },
            );
        }
        changed
    }

    /// Subscribe to record-changed notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of every record's last committed state
    pub fn export_snapshot(&self) -> CacheSnapshot {
        let records = self
            .records()
            .into_iter()
            .map(|record| {
                let state = record.state();
                SnapshotRecord {
                    identity: record.identity().key().to_string(),
                    inputs: state.inputs.clone(),
                    outputs: state.outputs.clone(),
                    expires_at: to_millis(state.expires_at),
                    resolved: state.resolved,
                    suppressed: record.is_suppressed(),
                    ignored_inputs: record.ignored(ParameterSide::Input),
                    ignored_outputs: record.ignored(ParameterSide::Output),
                    latest_version: state.latest_version.clone(),
                }
            })
            .collect();

        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now().timestamp_millis(),
            records,
        }
    }

    /// Merge a persisted snapshot into the live cache.
    ///
    /// Absent identities are inserted. A live record that is resolved or
    /// in flight is kept as is; an unresolved one adopts the persisted state.
    /// User flags are only ever added by an import, never cleared.
    pub fn import_snapshot(&self, snapshot: CacheSnapshot) -> ImportSummary {
        let mut summary = ImportSummary::default();

        for entry in snapshot.records {
            let identity = match ActionIdentity::parse(&entry.identity) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(identity = %entry.identity, error = %e, "Skipping snapshot entry");
                    summary.invalid += 1;
                    continue;
                }
            };

            let mut expires_at = from_millis(entry.expires_at);
            if entry.resolved && expires_at.is_none() && !identity.is_local() {
                // Remote data without an expiry is treated as already stale
                expires_at = from_millis(1);
            }
            let state = ResolutionState {
                inputs: entry.inputs,
                outputs: entry.outputs,
                resolved: entry.resolved,
                expires_at,
                last_error: None,
                latest_version: entry.latest_version,
            };

            let live = match self.inner.records.entry(identity.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::new(ActionRecord::restored(
                        identity,
                        state,
                        entry.suppressed,
                        entry.ignored_inputs,
                        entry.ignored_outputs,
                    )));
                    summary.inserted += 1;
                    continue;
                }
                Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            };

            live.merge_user_flags(
                entry.suppressed,
                &entry.ignored_inputs,
                &entry.ignored_outputs,
            );

            // Holding the vacant in-flight slot keeps a resolution from
            // starting while the persisted state is adopted
            match self.inner.in_flight.entry(identity) {
                Entry::Occupied(_) => summary.kept_live += 1,
                Entry::Vacant(_) if live.is_resolved() => summary.kept_live += 1,
                Entry::Vacant(_) => {
                    live.replace_state(state);
                    summary.merged += 1;
                }
            }
        }

        info!(
            inserted = summary.inserted,
            merged = summary.merged,
            kept_live = summary.kept_live,
            invalid = summary.invalid,
            "Imported cache snapshot"
        );
        summary
    }

    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let mut stats = CacheStats {
            in_flight: self.inner.in_flight.len(),
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        for record in self.inner.records.iter() {
            let state = record.value().state();
            stats.records += 1;
            if state.resolved {
                stats.resolved += 1;
            }
            if state.is_fresh(now) {
                stats.fresh += 1;
            }
        }
        stats
    }
}

/// `now + ttl`, truncated to the millisecond precision snapshots keep
fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .trunc_subsecs(3)
}

/// Why `resolve_async` leaves a record alone, if it does
fn skip_reason(record: &ActionRecord, now: DateTime<Utc>) -> Option<&'static str> {
    // Local lookups are cheap and detect a vanished file
    if record.identity().is_local() {
        return None;
    }
    let state = record.state();
    if state.is_fresh(now) {
        Some("fresh")
    } else if state.has_permanent_error() {
        Some("permanent error")
    } else {
        None
    }
}

impl CacheInner {
    fn record(&self, identity: &ActionIdentity) -> Arc<ActionRecord> {
        if let Some(existing) = self.records.get(identity) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .records
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(ActionRecord::new(identity.clone())));
        Arc::clone(entry.value())
    }

    fn spawn_resolution(
        self: &Arc<Self>,
        identity: ActionIdentity,
        ticket: u64,
        done: watch::Sender<bool>,
        origin: &'static str,
    ) -> JoinHandle<Result<(), ResolutionError>> {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let span = resolution_span(identity.key(), origin);
        let guard = InFlightGuard {
            inner: Arc::clone(self),
            identity,
            ticket,
            done,
        };

        self.runtime.spawn(
            async move {
                let started = Instant::now();
                let outcome = guard.inner.lookup(&guard.identity).await;
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "Lookup finished"
                );
                let result = outcome.as_ref().map(|_| ()).map_err(Clone::clone);
                guard.inner.finish(&guard.identity, ticket, outcome);
                drop(guard);
                result
            }
            .instrument(span),
        )
    }

    async fn lookup(&self, identity: &ActionIdentity) -> Result<Lookup, ResolutionError> {
        if identity.is_local() {
            let descriptor = resolve_local(self.local.as_ref(), identity).await?;
            return Ok((descriptor, None));
        }
        let descriptor = self.fetcher.fetch(identity).await?;
        Ok((descriptor, self.latest_version(identity).await))
    }

    /// Latest release of the identity's repository, from the per-slug cache
    /// when still fresh. A failed lookup is logged and retried next time.
    async fn latest_version(&self, identity: &ActionIdentity) -> Option<String> {
        let versions = self.versions.as_ref()?;
        let slug = identity.slug();
        let now = Utc::now();
        if let Some(known) = self.latest.get(slug) {
            if now < known.expires_at {
                return known.version.clone();
            }
        }

        match versions.latest_version(slug).await {
            Ok(version) => {
                self.latest.insert(
                    slug.to_string(),
                    LatestRelease {
                        version: version.clone(),
                        expires_at: expiry_after(now, self.settings.ttl),
                    },
                );
                version
            }
            Err(error) => {
                warn!(slug = %slug, error = %error, "Latest release lookup failed");
                None
            }
        }
    }

    /// Commit and release the in-flight slot as one step
    fn finish(
        &self,
        identity: &ActionIdentity,
        ticket: u64,
        outcome: Result<Lookup, ResolutionError>,
    ) {
        match self.in_flight.entry(identity.clone()) {
            Entry::Occupied(entry) => {
                self.commit(identity, outcome);
                if entry.get().ticket == ticket {
                    entry.remove();
                }
            }
            Entry::Vacant(_) => self.commit(identity, outcome),
        }
    }

    fn commit(&self, identity: &ActionIdentity, outcome: Result<Lookup, ResolutionError>) {
        let record = self.record(identity);
        let now = Utc::now();

        let next = match outcome {
            Ok((descriptor, latest_version)) => {
                let expires_at =
                    (!identity.is_local()).then(|| expiry_after(now, self.settings.ttl));
                ResolutionState::resolved(descriptor, expires_at)
                    .with_latest_version(latest_version)
            }
            Err(error) => ResolutionState::failed(error),
        };

        let previous = record.replace_state(next.clone());

        match &next.last_error {
            None => {
                let changed = !previous.resolved
                    || previous.inputs != next.inputs
                    || previous.outputs != next.outputs
                    || previous.latest_version != next.latest_version;
                debug!(
                    inputs = next.inputs.len(),
                    outputs = next.outputs.len(),
                    "Committed resolution"
                );
                if changed {
                    self.events.emit(identity, RecordChange::Resolved);
                }
            }
            Some(error) => {
                warn!(error = %error, permanent = error.is_permanent(), "Resolution failed");
                if previous.resolved || previous.last_error != next.last_error {
                    self.events.emit(identity, RecordChange::Failed(error.kind()));
                }
            }
        }
    }
}
