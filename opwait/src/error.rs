//! Error types for reconciliation.
//!
//! Two layers: [`TransportError`] describes one failed read against the
//! remote system, [`PollError`] is the terminal failure of a probe, a poll
//! loop or a whole reconciliation.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single read request.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Could not reach the remote system (connect refused, reset, DNS).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request did not complete within the per-request timeout.
    #[error("request timed out")]
    Timeout,

    /// The remote system answered with a non-success HTTP status.
    #[error("http {code}: {body}")]
    Status { code: u16, body: String },

    /// The response body was not a JSON document.
    #[error("undecodable response body: {0}")]
    Decode(String),

    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether retrying the same read may succeed.
    ///
    /// Connection-level failures, timeouts, 429/500/502/503, a 409 caused by
    /// a concurrent operation and a 403 per-minute quota rejection are
    /// transient. Everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Connect(_) | TransportError::Timeout => true,
            TransportError::Status { code, body } => match code {
                429 | 500 | 502 | 503 => true,
                409 => body.contains("operationInProgress"),
                403 => is_per_minute_quota(body),
                _ => false,
            },
            TransportError::Decode(_) | TransportError::InvalidRequest(_) => false,
        }
    }

    /// Whether the remote system reported the target as absent (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::Status { code: 404, .. })
    }
}

// Some APIs answer rate limiting with 403 instead of 429.
fn is_per_minute_quota(body: &str) -> bool {
    body.contains("Quota exceeded for quota metric") && body.contains("per minute")
}

/// Terminal failure of a reconciliation.
#[derive(Debug, Clone, Error)]
pub enum PollError {
    /// Transport failure that survived the in-tick retries, or a permanent one.
    #[error("transport failure after {attempts} attempt(s): {source}")]
    Transport {
        #[source]
        source: TransportError,
        attempts: u32,
    },

    /// The remote system finished the operation with an error.
    #[error("{description} failed: {message}")]
    Remote {
        description: String,
        code: String,
        message: String,
    },

    /// The remote system cancelled the operation.
    #[error("{description} was cancelled by the remote system")]
    RemoteCancelled { description: String },

    /// Budget exhausted while the operation was still pending.
    #[error("timed out after {elapsed:?} waiting for {description} (last: {last_reason})")]
    Timeout {
        description: String,
        elapsed: Duration,
        last_reason: String,
    },

    /// The caller gave up.
    #[error("wait for {description} cancelled by caller")]
    Cancelled { description: String },

    /// A status or listing document did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The sub-resource is absent from every page of a listing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource settled in a state the caller did not expect.
    #[error("{resource} has unexpected state {state:?}")]
    UnexpectedState { resource: String, state: String },

    /// The resource settled in one of its declared error states.
    #[error("{resource} settled in error state {state:?}: {message}")]
    ErrorState {
        resource: String,
        state: String,
        message: String,
    },

    /// The operation handle or probe target is unusable.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}

impl PollError {
    /// Transport failure from a single attempt.
    ///
    /// A body that is not JSON is a schema problem, not a connectivity one,
    /// and becomes [`PollError::Malformed`].
    pub fn transport(source: TransportError) -> Self {
        match source {
            TransportError::Decode(detail) => {
                PollError::Malformed(format!("undecodable response body: {}", detail))
            }
            source => PollError::Transport {
                source,
                attempts: 1,
            },
        }
    }

    /// Whether the poll loop may retry this failure within the same tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, PollError::Transport { source, .. } if source.is_transient())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollError::Cancelled { .. })
    }
}

impl From<TransportError> for PollError {
    fn from(e: TransportError) -> Self {
        PollError::transport(e)
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, PollError>;
