//! Per-identity resolution state

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wfref_foundation::{ActionDescriptor, ActionIdentity, ParameterMap, ResolutionError};
use wfref_resolver::is_outdated;

/// Result of the latest resolution of one identity.
///
/// Never mutated after construction: a commit builds a new value and swaps
/// it into the record, so readers see either the old or the new state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionState {
    pub inputs: ParameterMap,
    pub outputs: ParameterMap,
    pub resolved: bool,
    /// `None` for unresolved records and for local records, which do not expire
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<ResolutionError>,
    /// Tag of the newest release of the action's repository, when looked up
    pub latest_version: Option<String>,
}

impl ResolutionState {
    pub fn resolved(descriptor: ActionDescriptor, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            inputs: descriptor.inputs,
            outputs: descriptor.outputs,
            resolved: true,
            expires_at,
            last_error: None,
            latest_version: None,
        }
    }

    pub fn with_latest_version(mut self, latest_version: Option<String>) -> Self {
        self.latest_version = latest_version;
        self
    }

    pub fn failed(error: ResolutionError) -> Self {
        Self {
            last_error: Some(error),
            ..Self::default()
        }
    }

    /// Resolved and, when it has an expiry, not yet expired
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.resolved && self.expires_at.map_or(true, |expires_at| now < expires_at)
    }

    /// Failed with an error that only an explicit reload clears
    pub fn has_permanent_error(&self) -> bool {
        self.last_error
            .as_ref()
            .is_some_and(ResolutionError::is_permanent)
    }
}

/// Which declared parameter list an ignore flag applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSide {
    Input,
    Output,
}

/// Cached knowledge about one action reference.
///
/// Owned by the cache that created it and shared out as `Arc<ActionRecord>`.
/// Resolution commits replace the whole [`ResolutionState`]; the user flags
/// (`suppressed` and the ignore sets) live beside it and are only changed by
/// explicit user action.
#[derive(Debug)]
pub struct ActionRecord {
    identity: ActionIdentity,
    state: RwLock<Arc<ResolutionState>>,
    suppressed: AtomicBool,
    ignored_inputs: RwLock<BTreeSet<String>>,
    ignored_outputs: RwLock<BTreeSet<String>>,
}

impl ActionRecord {
    pub fn new(identity: ActionIdentity) -> Self {
        Self {
            identity,
            state: RwLock::new(Arc::new(ResolutionState::default())),
            suppressed: AtomicBool::new(false),
            ignored_inputs: RwLock::new(BTreeSet::new()),
            ignored_outputs: RwLock::new(BTreeSet::new()),
        }
    }

    pub(crate) fn restored(
        identity: ActionIdentity,
        state: ResolutionState,
        suppressed: bool,
        ignored_inputs: BTreeSet<String>,
        ignored_outputs: BTreeSet<String>,
    ) -> Self {
        Self {
            identity,
            state: RwLock::new(Arc::new(state)),
            suppressed: AtomicBool::new(suppressed),
            ignored_inputs: RwLock::new(ignored_inputs),
            ignored_outputs: RwLock::new(ignored_outputs),
        }
    }

    pub fn identity(&self) -> &ActionIdentity {
        &self.identity
    }

    /// Consistent view of the latest committed resolution
    pub fn state(&self) -> Arc<ResolutionState> {
        Arc::clone(&self.state.read())
    }

    pub fn is_resolved(&self) -> bool {
        self.state.read().resolved
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.state.read().is_fresh(now)
    }

    pub fn last_error(&self) -> Option<ResolutionError> {
        self.state.read().last_error.clone()
    }

    pub fn latest_version(&self) -> Option<String> {
        self.state.read().latest_version.clone()
    }

    /// Pinned to an older major version than the latest release
    pub fn is_outdated(&self) -> bool {
        let state = self.state.read();
        match (self.identity.git_ref(), &state.latest_version) {
            (Some(current), Some(latest)) => is_outdated(current, latest),
            _ => false,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::Acquire)
    }

    pub fn is_ignored(&self, side: ParameterSide, name: &str) -> bool {
        self.ignore_set(side).read().contains(name)
    }

    pub fn ignored(&self, side: ParameterSide) -> BTreeSet<String> {
        self.ignore_set(side).read().clone()
    }

    /// Whether `name` is declared on the given side, or the user chose to
    /// ignore it. Unresolved records accept everything.
    pub fn accepts(&self, side: ParameterSide, name: &str) -> bool {
        let state = self.state();
        if !state.resolved {
            return true;
        }
        let declared = match side {
            ParameterSide::Input => &state.inputs,
            ParameterSide::Output => &state.outputs,
        };
        declared.contains_key(name) || self.is_ignored(side, name)
    }

    /// Swap in a new state, returning the previous one
    pub(crate) fn replace_state(&self, next: ResolutionState) -> Arc<ResolutionState> {
        std::mem::replace(&mut *self.state.write(), Arc::new(next))
    }

    /// Returns true when the flag changed
    pub(crate) fn set_suppressed(&self, suppressed: bool) -> bool {
        self.suppressed.swap(suppressed, Ordering::AcqRel) != suppressed
    }

    /// Flip the flag, returning the new value
    pub(crate) fn toggle_suppressed(&self) -> bool {
        !self.suppressed.fetch_xor(true, Ordering::AcqRel)
    }

    /// Returns true when the set changed
    pub(crate) fn set_ignored(&self, side: ParameterSide, name: &str, ignored: bool) -> bool {
        let mut set = self.ignore_set(side).write();
        if ignored {
            set.insert(name.to_string())
        } else {
            set.remove(name)
        }
    }

    /// Fold persisted user flags into this record without clearing any
    pub(crate) fn merge_user_flags(
        &self,
        suppressed: bool,
        ignored_inputs: &BTreeSet<String>,
        ignored_outputs: &BTreeSet<String>,
    ) {
        if suppressed {
            self.suppressed.store(true, Ordering::Release);
        }
        self.ignored_inputs
            .write()
            .extend(ignored_inputs.iter().cloned());
        self.ignored_outputs
            .write()
            .extend(ignored_outputs.iter().cloned());
    }

    fn ignore_set(&self, side: ParameterSide) -> &RwLock<BTreeSet<String>> {
        match side {
            ParameterSide::Input => &self.ignored_inputs,
            ParameterSide::Output => &self.ignored_outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> ActionRecord {
        ActionRecord::new(ActionIdentity::parse("actions/checkout@v4").unwrap())
    }

    fn descriptor() -> ActionDescriptor {
        let mut inputs = ParameterMap::new();
        inputs.insert("fetch-depth".to_string(), "Number of commits".to_string());
        ActionDescriptor::new(inputs, ParameterMap::new())
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let state = ResolutionState::resolved(descriptor(), Some(now + Duration::seconds(10)));
        assert!(state.is_fresh(now));
        assert!(!state.is_fresh(now + Duration::seconds(10)));

        let local = ResolutionState::resolved(descriptor(), None);
        assert!(local.is_fresh(now + Duration::days(365)));

        assert!(!ResolutionState::default().is_fresh(now));
    }

    #[test]
    fn test_permanent_errors() {
        assert!(ResolutionState::failed(ResolutionError::not_found("x")).has_permanent_error());
        assert!(!ResolutionState::failed(ResolutionError::network("x")).has_permanent_error());
        assert!(!ResolutionState::default().has_permanent_error());
    }

    #[test]
    fn test_replace_state_keeps_user_flags() {
        let record = record();
        assert!(record.set_suppressed(true));
        assert!(!record.set_suppressed(true));
        assert!(record.set_ignored(ParameterSide::Input, "token", true));

        let previous = record.replace_state(ResolutionState::resolved(descriptor(), None));
        assert!(!previous.resolved);
        assert!(record.is_resolved());
        assert!(record.is_suppressed());
        assert!(record.is_ignored(ParameterSide::Input, "token"));
    }

    #[test]
    fn test_outdated_needs_a_newer_major_release() {
        let latest = || {
            ResolutionState::resolved(descriptor(), None)
                .with_latest_version(Some("v4.0.0".to_string()))
        };

        let record = ActionRecord::new(ActionIdentity::parse("actions/setup-java@v3").unwrap());
        assert!(!record.is_outdated());
        record.replace_state(latest());
        assert!(record.is_outdated());
        assert_eq!(record.latest_version().as_deref(), Some("v4.0.0"));

        let current =
            ActionRecord::new(ActionIdentity::parse("actions/setup-java@v4.5.2").unwrap());
        current.replace_state(latest());
        assert!(!current.is_outdated());
    }

    #[test]
    fn test_toggle_suppressed() {
        let record = record();
        assert!(record.toggle_suppressed());
        assert!(record.is_suppressed());
        assert!(!record.toggle_suppressed());
        assert!(!record.is_suppressed());
    }

    #[test]
    fn test_accepts_declared_or_ignored() {
        let record = record();
        assert!(record.accepts(ParameterSide::Input, "anything"));

        record.replace_state(ResolutionState::resolved(descriptor(), None));
        assert!(record.accepts(ParameterSide::Input, "fetch-depth"));
        assert!(!record.accepts(ParameterSide::Input, "depth"));

        record.set_ignored(ParameterSide::Input, "depth", true);
        assert!(record.accepts(ParameterSide::Input, "depth"));
        assert!(!record.accepts(ParameterSide::Output, "depth"));
    }
}
