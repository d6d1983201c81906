//! Action resolution cache for wfref
//!
//! [`ActionCache`] owns one [`ActionRecord`] per referenced action and keeps
//! them resolved in the background: at most one lookup per identity is ever
//! in flight, successful remote lookups stay fresh for a fixed TTL, and the
//! whole cache can be saved to and restored from a [`CacheSnapshot`].
//! [`ChangeTrigger`] feeds it from editor events with per-document debouncing.

pub mod cache;
pub mod events;
pub mod record;
pub mod snapshot;
pub mod trigger;

pub use cache::{ActionCache, CacheSettings, CacheStats, ImportSummary, ResolveBatch};
pub use events::{RecordChange, RecordEvent};
pub use record::{ActionRecord, ParameterSide, ResolutionState};
pub use snapshot::{CacheSnapshot, SnapshotRecord, SnapshotStore, SNAPSHOT_VERSION};
pub use trigger::{ChangeTrigger, ReferenceExtractor, TriggerSettings};
