//! Record-changed notifications

use crate::record::ParameterSide;
use tokio::sync::broadcast;
use wfref_foundation::{ActionIdentity, ResolutionErrorKind};

/// Capacity of the notification channel; slow subscribers see `Lagged`
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened to a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    /// Became resolved, or its declared parameters or latest release changed
    Resolved,
    /// Lost its resolution or started failing differently
    Failed(ResolutionErrorKind),
    SuppressionChanged { suppressed: bool },
    IgnoredChanged {
        side: ParameterSide,
        name: String,
        ignored: bool,
    },
    /// Cached data dropped by an explicit clear
    Invalidated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEvent {
    pub identity: ActionIdentity,
    pub change: RecordChange,
}

/// Fan-out of [`RecordEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<RecordEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RecordEvent> {
        self.sender.subscribe()
    }

    /// Nobody listening is not an error
    pub(crate) fn emit(&self, identity: &ActionIdentity, change: RecordChange) {
        let _ = self.sender.send(RecordEvent {
            identity: identity.clone(),
            change,
        });
    }
}
