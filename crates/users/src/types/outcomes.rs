//! Success values returned by the synchronization engine.

use idsync_database::User;
use idsync_identity::RemoteIdentity;

/// The three outcomes an administrative caller distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Local and remote state both reflect the request.
    Applied,
    /// Local state committed but the provider did not follow; retry recommended.
    Diverged,
    /// Nothing changed.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoOpReason {
    /// No local row has the requested id.
    UserMissing,
    AlreadySynced { remote_ref: String },
}

/// Result of the default-user sync.
#[derive(Debug, Clone)]
pub enum SyncResult {
    Synced(RemoteIdentity),
    NoOp(NoOpReason),
}

impl SyncResult {
    pub fn disposition(&self) -> Disposition {
        match self {
            SyncResult::Synced(_) => Disposition::Applied,
            SyncResult::NoOp(_) => Disposition::Rejected,
        }
    }
}

/// What happened on the provider side of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSync {
    Applied,
    /// The user has no provider identity, so nothing was sent.
    Skipped,
    Diverged { reason: String },
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub user: User,
    pub remote: RemoteSync,
    pub message: String,
}

impl SyncOutcome {
    pub(crate) fn new(user: User, remote: RemoteSync, message: impl Into<String>) -> Self {
        Self {
            user,
            remote,
            message: message.into(),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self.remote {
            RemoteSync::Applied | RemoteSync::Skipped => Disposition::Applied,
            RemoteSync::Diverged { .. } => Disposition::Diverged,
        }
    }
}
