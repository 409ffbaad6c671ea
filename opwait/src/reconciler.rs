//! Operation reconciler.
//!
//! Entry point for resource lifecycle code. After a mutating call the caller
//! hands over its [`MutationResult`]; the reconciler polls the operation
//! until it has taken effect and returns the terminal outcome.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconcilerConfig;
use crate::error::{PollError, Result};
use crate::operation::MutationResult;
use crate::poll::PollLoop;
use crate::prober::OperationProber;
use crate::state::{
    Confirm, ExistenceProber, Presence, ResourceReader, RestingStateProber, RestingStates,
};
use crate::transport::Transport;

/// Waits for mutations to take effect. Holds no state between calls.
pub struct OperationReconciler<'a> {
    transport: &'a dyn Transport,
    config: &'a ReconcilerConfig,
}

impl<'a> OperationReconciler<'a> {
    pub fn new(transport: &'a dyn Transport, config: &'a ReconcilerConfig) -> Self {
        Self { transport, config }
    }

    /// Wait for the mutation's operation to finish.
    ///
    /// Without an operation handle the mutation already took effect and this
    /// returns immediately. On success, yields the operation's `response`
    /// document when the remote system attached one.
    pub async fn reconcile(
        &self,
        mutation: MutationResult,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let Some(handle) = mutation.operation else {
            debug!("Mutation returned no operation, nothing to wait for");
            return Ok(None);
        };

        let mut prober = OperationProber::new(self.transport, &handle, self.config)?;
        info!(
            "Waiting for {} (operation {} in {})",
            handle.description(),
            handle.name(),
            handle.scope()
        );

        match PollLoop::new(self.config, cancel)
            .run(&mut prober, budget)
            .await
        {
            Ok(response) => {
                info!("{} finished for {}", handle.description(), handle.target());
                Ok(response)
            }
            Err(e) => {
                match &e {
                    PollError::RemoteCancelled { .. } => warn!(
                        "Operation {} was cancelled remotely, not retrying",
                        handle.name()
                    ),
                    PollError::Malformed(detail) => error!(
                        "Operation {} returned a document we cannot read: {}",
                        handle.name(),
                        detail
                    ),
                    PollError::Timeout { elapsed, .. } => warn!(
                        "Operation {} still running after {:?}",
                        handle.name(),
                        elapsed
                    ),
                    _ => warn!("Operation {} failed: {}", handle.name(), e),
                }
                Err(e)
            }
        }
    }

    /// Like [`reconcile`](Self::reconcile), decoding the operation response.
    pub async fn reconcile_into<T: DeserializeOwned>(
        &self,
        mutation: MutationResult,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        match self.reconcile(mutation, budget, cancel).await? {
            Some(response) => serde_json::from_value(response)
                .map(Some)
                .map_err(|e| PollError::Malformed(format!("operation response: {}", e))),
            None => Ok(None),
        }
    }

    /// Wait for a resource to settle in one of `states`.
    pub async fn await_resting_state(
        &self,
        confirm: Confirm,
        states: RestingStates,
        state_field: &str,
        description: &str,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let reader = ResourceReader::new(self.transport, confirm, self.config.page_size);
        let mut prober = RestingStateProber::new(reader, states, state_field, description);
        PollLoop::new(self.config, cancel)
            .run(&mut prober, budget)
            .await
    }

    /// Wait until a resource has been observed in the wanted presence
    /// `target_occurrences` times in a row.
    pub async fn await_existence(
        &self,
        confirm: Confirm,
        want: Presence,
        target_occurrences: u32,
        description: &str,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let reader = ResourceReader::new(self.transport, confirm, self.config.page_size);
        let mut prober = ExistenceProber::new(reader, want, target_occurrences, description);
        PollLoop::new(self.config, cancel)
            .run(&mut prober, budget)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffPolicy;
    use crate::error::TransportError;
    use crate::operation::{OperationHandle, OperationKind, Scope};
    use crate::transport::fake::ScriptedTransport;
    use serde::Deserialize;
    use serde_json::json;

    const OP_URL: &str = "http://api.test/projects/p/regions/r1/operations/op-7";
    const LRO_URL: &str = "http://api.test/projects/p/locations/r1/operations/op-8";

    fn config() -> ReconcilerConfig {
        ReconcilerConfig::default()
            .with_base_url("http://api.test")
            .with_project("p")
            .with_backoff(BackoffPolicy::fixed(Duration::from_secs(2)))
            .with_transient_retries(2, Duration::from_millis(200))
    }

    fn compute_op() -> MutationResult {
        MutationResult::pending(
            OperationHandle::new(
                OperationKind::Compute,
                "op-7",
                Scope::Region("r1".into()),
                "subnetworks/s1",
                "Creating Subnetwork",
            )
            .unwrap(),
        )
    }

    fn lro_op() -> MutationResult {
        MutationResult::pending(
            OperationHandle::from_response(
                OperationKind::LongRunning,
                &json!({ "name": "projects/p/locations/r1/operations/op-8" }),
                "instances/i1",
                "Creating Instance",
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_handle_is_immediate_success() {
        let transport = ScriptedTransport::new();
        let config = config();
        let cancel = CancellationToken::new();

        let out = OperationReconciler::new(&transport, &config)
            .reconcile(MutationResult::completed(), Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_twice_then_done() {
        let transport = ScriptedTransport::new();
        transport
            .ok(OP_URL, json!({ "status": "PENDING" }))
            .ok(OP_URL, json!({ "status": "RUNNING" }))
            .ok(OP_URL, json!({ "status": "DONE" }));
        let config = config();
        let cancel = CancellationToken::new();

        OperationReconciler::new(&transport, &config)
            .reconcile(compute_op(), Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_done_on_first_check() {
        let transport = ScriptedTransport::new();
        transport.ok(OP_URL, json!({ "status": "DONE" }));
        let config = config();
        let cancel = CancellationToken::new();

        OperationReconciler::new(&transport, &config)
            .reconcile(compute_op(), Duration::ZERO, &cancel)
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_hiccup_retried_transparently() {
        let transport = ScriptedTransport::new();
        transport
            .err(OP_URL, TransportError::Connect("connection reset by peer".into()))
            .ok(OP_URL, json!({ "status": "DONE" }));
        let config = config();
        let cancel = CancellationToken::new();

        OperationReconciler::new(&transport, &config)
            .reconcile(compute_op(), Duration::from_secs(60), &cancel)
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_cancellation_not_retried() {
        let transport = ScriptedTransport::new();
        transport.ok(
            LRO_URL,
            json!({
                "name": "projects/p/locations/r1/operations/op-8",
                "done": true,
                "error": { "code": 1, "message": "Operation was cancelled" }
            }),
        );
        let config = config();
        let cancel = CancellationToken::new();

        let err = OperationReconciler::new(&transport, &config)
            .reconcile(lro_op(), Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::RemoteCancelled { .. }));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_surfaces_message() {
        let transport = ScriptedTransport::new();
        transport.ok(
            OP_URL,
            json!({
                "status": "DONE",
                "error": { "errors": [{ "code": "INVALID_USAGE", "message": "range overlaps" }] }
            }),
        );
        let config = config();
        let cancel = CancellationToken::new();

        let err = OperationReconciler::new(&transport, &config)
            .reconcile(compute_op(), Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Creating Subnetwork failed: range overlaps");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_into_decodes_response() {
        #[derive(Debug, Deserialize)]
        struct Instance {
            name: String,
        }

        let transport = ScriptedTransport::new();
        transport
            .ok(LRO_URL, json!({ "name": "projects/p/locations/r1/operations/op-8" }))
            .ok(
                LRO_URL,
                json!({
                    "name": "projects/p/locations/r1/operations/op-8",
                    "done": true,
                    "response": { "name": "instances/i1" }
                }),
            );
        let config = config();
        let cancel = CancellationToken::new();

        let instance: Instance = OperationReconciler::new(&transport, &config)
            .reconcile_into(lro_op(), Duration::from_secs(60), &cancel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.name, "instances/i1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_from_remote_error() {
        let transport = ScriptedTransport::new();
        transport.ok(OP_URL, json!({ "status": "RUNNING" }));
        let config = config();
        let cancel = CancellationToken::new();

        let err = OperationReconciler::new(&transport, &config)
            .reconcile(compute_op(), Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(!matches!(err, PollError::Remote { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_without_project_rejected() {
        let transport = ScriptedTransport::new();
        let config = ReconcilerConfig::default().with_base_url("http://api.test");
        let cancel = CancellationToken::new();

        let err = OperationReconciler::new(&transport, &config)
            .reconcile(compute_op(), Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::InvalidHandle(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_resting_state() {
        let url = "http://api.test/projects/p/locations/l/clusters/c1";
        let transport = ScriptedTransport::new();
        transport
            .ok(url, json!({ "status": "RECONCILING" }))
            .ok(url, json!({ "status": "RUNNING" }));
        let config = config();
        let cancel = CancellationToken::new();

        let doc = OperationReconciler::new(&transport, &config)
            .await_resting_state(
                Confirm::DirectRead(url.into()),
                RestingStates::new().ready("RUNNING").error("ERROR"),
                "status",
                "Cluster c1",
                Duration::from_secs(60),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(doc["status"], "RUNNING");
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_existence_after_create() {
        let url = "http://api.test/v1/projects/p/topics/t1";
        let transport = ScriptedTransport::new();
        transport
            .err(
                url,
                TransportError::Status {
                    code: 404,
                    body: "not found".into(),
                },
            )
            .ok(url, json!({ "name": "projects/p/topics/t1" }));
        let config = config();
        let cancel = CancellationToken::new();

        let doc = OperationReconciler::new(&transport, &config)
            .await_existence(
                Confirm::DirectRead(url.into()),
                Presence::Exists,
                1,
                "Topic t1",
                Duration::from_secs(60),
                &cancel,
            )
            .await
            .unwrap();
        assert!(doc.is_some());
        assert_eq!(transport.call_count(), 2);
    }
}
