//! opwait: waits for asynchronous cloud operations to take effect.
//!
//! A mutating call against a cloud control plane usually returns before the
//! change has been applied. This crate turns that eventually-consistent
//! result into a definitive one:
//!
//! - [`OperationReconciler`] polls an operation handle until it is done
//! - [`DeletionWatcher`] re-reads a resource until it is gone
//! - [`PaginatedLocator`] finds a sub-resource that is only reachable by listing
//!
//! All of them are driven by the same [`PollLoop`], which owns the time
//! budget, the backoff between checks and caller cancellation.

pub mod config;
pub mod deletion;
pub mod error;
pub mod locator;
pub mod operation;
pub mod poll;
pub mod prober;
pub mod reconciler;
pub mod state;
pub mod transport;
pub mod verdict;

pub use config::{BackoffPolicy, ReconcilerConfig};
pub use deletion::{DeletionTarget, DeletionWatcher};
pub use error::{PollError, Result, TransportError};
pub use locator::{ItemMatcher, Listing, MatchRule, PageCursor, PaginatedLocator};
pub use operation::{MutationResult, OperationHandle, OperationKind, OperationStatus, Scope};
pub use poll::{PollBudget, PollLoop};
pub use prober::{OperationProber, Prober};
pub use reconciler::OperationReconciler;
pub use state::{Confirm, Presence, RestingStates};
pub use transport::{HttpTransport, HttpTransportConfig, Transport};
pub use verdict::PollVerdict;
