//! Exclusive claims on single records, shared across processes.
//!
//! A [`RecordClaim`] pairs the in-process [`RecordLocks`] guard with a leased
//! row in the database. Callers in this process queue on the mutex; callers in
//! other processes poll the lease until it is released or expires. Holding a
//! claim keeps no transaction open, so other records stay writable while the
//! holder talks to the identity provider.

use std::time::Duration;

use idsync_database::ClaimRepository;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::deadline::Deadline;
use super::locks::{RecordGuard, RecordLocks};
use crate::types::{ServiceError, ServiceResult};

const FIRST_RETRY: Duration = Duration::from_millis(10);
const MAX_RETRY: Duration = Duration::from_millis(200);

#[derive(Clone)]
pub struct RecordClaims {
    locks: RecordLocks,
    store: ClaimRepository,
    lease: Duration,
}

/// Held claim on one record key.
///
/// Release it with [`RecordClaim::release`]. A claim dropped without release
/// (a cancelled operation) is released in the background.
pub struct RecordClaim {
    key: String,
    holder: String,
    store: ClaimRepository,
    released: bool,
    _guard: RecordGuard,
}

impl RecordClaims {
    /// `lease` bounds how long a crashed holder can keep a record.
    pub fn new(pool: SqlitePool, locks: RecordLocks, lease: Duration) -> Self {
        Self {
            locks,
            store: ClaimRepository::new(pool),
            lease,
        }
    }

    pub(crate) async fn user(&self, id: Uuid, deadline: &Deadline) -> ServiceResult<RecordClaim> {
        self.acquire(RecordLocks::user_key(id), deadline).await
    }

    pub(crate) async fn email(&self, email: &str, deadline: &Deadline) -> ServiceResult<RecordClaim> {
        self.acquire(RecordLocks::email_key(email), deadline).await
    }

    /// Wait until `key` is ours or the deadline passes.
    pub(crate) async fn acquire(
        &self,
        key: String,
        deadline: &Deadline,
    ) -> ServiceResult<RecordClaim> {
        let guard = deadline.within(self.locks.acquire(key.clone())).await?;
        let holder = Uuid::new_v4().to_string();
        let mut retry = FIRST_RETRY;

        loop {
            // Not cancelled by the deadline: a claim taken here is always handed
            // to a RecordClaim that releases it.
            if self.store.try_claim(&key, &holder, self.lease).await? {
                trace!(%key, "record claimed");
                return Ok(RecordClaim {
                    key,
                    holder,
                    store: self.store.clone(),
                    released: false,
                    _guard: guard,
                });
            }

            debug!(%key, ?retry, "record is claimed elsewhere, waiting");
            deadline.within(tokio::time::sleep(retry)).await?;
            retry = (retry * 2).min(MAX_RETRY);
        }
    }
}

impl RecordClaim {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fail unless the claim is still ours. Run inside the transaction that
    /// stores the change the claim protects.
    pub(crate) async fn verify(&self, conn: &mut SqliteConnection) -> ServiceResult<()> {
        if self.store.holds_in(conn, &self.key, &self.holder).await? {
            return Ok(());
        }
        warn!(key = %self.key, "record claim lapsed before the change was stored");
        Err(ServiceError::Conflict(format!(
            "claim on {} expired and was taken by another operation",
            self.key
        )))
    }

    pub async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.store.release(&self.key, &self.holder).await {
            warn!(key = %self.key, error = %err, "failed to release record claim, it lapses with its lease");
        }
    }
}

impl Drop for RecordClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let holder = std::mem::take(&mut self.holder);
        handle.spawn(async move {
            if let Err(err) = store.release(&key, &holder).await {
                warn!(%key, error = %err, "failed to release abandoned record claim");
            }
        });
    }
}
