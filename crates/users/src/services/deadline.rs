use std::future::Future;
use std::time::Duration;

use idsync_identity::{IdentityError, IdentityResult};
use tokio::time::{timeout_at, Instant};

use crate::types::{ServiceError, ServiceResult};

/// Point in time an operation must finish by.
pub(crate) struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub(crate) fn start(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub(crate) async fn within<T>(&self, fut: impl Future<Output = T>) -> ServiceResult<T> {
        timeout_at(self.at, fut)
            .await
            .map_err(|_| ServiceError::TimedOut(self.budget))
    }

    /// Local step; exceeding the deadline aborts with `TimedOut`.
    pub(crate) async fn local<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
    ) -> ServiceResult<T>
    where
        E: Into<ServiceError>,
    {
        self.within(fut).await?.map_err(Into::into)
    }

    /// Remote step; exceeding the deadline reads as a provider timeout.
    pub(crate) async fn remote<T>(
        &self,
        fut: impl Future<Output = IdentityResult<T>>,
    ) -> IdentityResult<T> {
        timeout_at(self.at, fut)
            .await
            .unwrap_or(Err(IdentityError::Timeout))
    }
}
