//! Deletion watcher.
//!
//! For resources whose delete call returns no operation handle. The watcher
//! re-reads the resource until it is gone:
//! - absent (404, or missing from every listing page) → done
//! - present in a deleting state → keep polling
//! - present in any other state → the delete did not take effect; fail

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ReconcilerConfig;
use crate::error::{PollError, Result};
use crate::locator::{ItemMatcher, Listing};
use crate::poll::PollLoop;
use crate::prober::Prober;
use crate::state::{field_str, Confirm, ResourceReader};
use crate::transport::Transport;
use crate::verdict::PollVerdict;

/// A resource being deleted and how to tell that it is gone.
#[derive(Debug, Clone)]
pub struct DeletionTarget {
    description: String,
    confirm: Confirm,
    state_field: String,
    deleting_states: Vec<String>,
}

impl DeletionTarget {
    /// Confirm by reading the resource URL directly.
    pub fn direct(url: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Confirm::DirectRead(url.into()), description)
    }

    /// Confirm by searching a listing, for kinds without a direct read.
    pub fn via_listing(
        listing: Listing,
        matcher: ItemMatcher,
        description: impl Into<String>,
    ) -> Self {
        Self::new(Confirm::Listing { listing, matcher }, description)
    }

    fn new(confirm: Confirm, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            confirm,
            state_field: "state".to_string(),
            deleting_states: vec!["DELETING".to_string()],
        }
    }

    pub fn with_state_field(mut self, field: impl Into<String>) -> Self {
        self.state_field = field.into();
        self
    }

    pub fn with_deleting_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deleting_states = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Polls a resource until its deletion is confirmed.
pub struct DeletionWatcher<'a> {
    transport: &'a dyn Transport,
    config: &'a ReconcilerConfig,
}

impl<'a> DeletionWatcher<'a> {
    pub fn new(transport: &'a dyn Transport, config: &'a ReconcilerConfig) -> Self {
        Self { transport, config }
    }

    pub async fn wait(
        &self,
        target: DeletionTarget,
        max: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let description = target.description.clone();
        let mut prober = DeletionProber {
            reader: ResourceReader::new(self.transport, target.confirm, self.config.page_size),
            description: target.description,
            state_field: target.state_field,
            deleting_states: target.deleting_states,
        };

        PollLoop::new(self.config, cancel)
            .run(&mut prober, max)
            .await?;
        info!("{} is gone", description);
        Ok(())
    }
}

struct DeletionProber<'a> {
    reader: ResourceReader<'a>,
    description: String,
    state_field: String,
    deleting_states: Vec<String>,
}

#[async_trait]
impl Prober for DeletionProber<'_> {
    type Output = ();

    fn description(&self) -> &str {
        &self.description
    }

    async fn probe(&mut self) -> PollVerdict<()> {
        let doc = match self.reader.read().await {
            Ok(Some(doc)) => doc,
            Ok(None) => return PollVerdict::Success(()),
            Err(e) => return PollVerdict::Failure(e),
        };

        match field_str(&doc, &self.state_field) {
            Some(state) if self.deleting_states.iter().any(|s| s == state) => {
                PollVerdict::Pending(format!("{} is {}", self.description, state))
            }
            Some(state) => PollVerdict::Failure(PollError::UnexpectedState {
                resource: self.description.clone(),
                state: state.to_string(),
            }),
            None => PollVerdict::Failure(PollError::Malformed(format!(
                "{} has no {} field",
                self.description, self.state_field
            ))),
        }
    }
}
