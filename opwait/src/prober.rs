//! Status probers.
//!
//! A prober performs exactly one read per call and classifies it into a
//! [`PollVerdict`]. Probers never retry; that is the poll loop's job.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::ReconcilerConfig;
use crate::error::{PollError, Result, TransportError};
use crate::operation::{OperationHandle, OperationStatus};
use crate::transport::Transport;
use crate::verdict::PollVerdict;

/// One status check against the remote system.
#[async_trait]
pub trait Prober: Send {
    /// Payload produced on success.
    type Output: Send;

    /// What is being waited for, used in timeout and cancellation errors.
    fn description(&self) -> &str;

    /// Issue one read and classify it.
    async fn probe(&mut self) -> PollVerdict<Self::Output>;
}

/// Prober for an operation handle. Succeeds with the operation's `response`
/// document, if it has one.
pub struct OperationProber<'a> {
    transport: &'a dyn Transport,
    handle: &'a OperationHandle,
    url: String,
}

impl<'a> OperationProber<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        handle: &'a OperationHandle,
        config: &ReconcilerConfig,
    ) -> Result<Self> {
        let url = handle.status_url(config)?;
        Ok(Self {
            transport,
            handle,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Prober for OperationProber<'_> {
    type Output = Option<Value>;

    fn description(&self) -> &str {
        self.handle.description()
    }

    async fn probe(&mut self) -> PollVerdict<Self::Output> {
        let doc = match self.transport.get(&self.url).await {
            Ok(doc) => doc,
            Err(TransportError::Decode(detail)) => {
                error!(
                    "Undecodable status document for operation {}: {}",
                    self.handle.name(),
                    detail
                );
                return PollVerdict::Failure(PollError::transport(TransportError::Decode(detail)));
            }
            Err(e) => return PollVerdict::Failure(PollError::transport(e)),
        };

        match OperationStatus::parse(self.handle.kind(), &doc) {
            Ok(OperationStatus::InProgress(state)) => {
                debug!("Operation {} is {}", self.handle.name(), state);
                PollVerdict::Pending(format!("{} is {}", self.handle.description(), state))
            }
            Ok(OperationStatus::Done {
                error: Some(err), ..
            }) if err.cancelled => PollVerdict::Failure(PollError::RemoteCancelled {
                description: self.handle.description().to_string(),
            }),
            Ok(OperationStatus::Done {
                error: Some(err), ..
            }) => PollVerdict::Failure(PollError::Remote {
                description: self.handle.description().to_string(),
                code: err.code,
                message: err.message,
            }),
            Ok(OperationStatus::Done {
                error: None,
                response,
            }) => PollVerdict::Success(response),
            Err(e) => {
                error!(
                    "Unexpected status document for operation {}: {}",
                    self.handle.name(),
                    e
                );
                PollVerdict::Failure(e)
            }
        }
    }
}
