use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::storage::{StoreError, StoreResult};

/// Per-call context handed down from the transport layer.
/// The deadline bounds every credential store call made on behalf of the request;
/// on elapse the in-flight future is dropped and the call fails with `Timeout`.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub ip: Option<String>,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { deadline: Some(Instant::now() + timeout), ..Default::default() }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub async fn run<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                Ok(res) => res,
                Err(_) => Err(StoreError::Timeout),
            },
            None => fut.await,
        }
    }
}
