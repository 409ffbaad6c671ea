//! Probes over a resource's own representation.
//!
//! Used when there is no operation handle to poll: the resource itself is
//! re-read until it shows the expected state. A resource is read either
//! directly (a 404 means absent) or, for kinds without a direct read, by
//! locating it in a paginated listing.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{PollError, Result};
use crate::locator::{ItemMatcher, Listing, PaginatedLocator};
use crate::prober::Prober;
use crate::transport::Transport;
use crate::verdict::PollVerdict;

/// How a resource's presence is established.
#[derive(Debug, Clone)]
pub enum Confirm {
    /// GET the resource URL; 404 means it is gone.
    DirectRead(String),
    /// Search a listing; exhausting every page means it is gone.
    Listing {
        listing: Listing,
        matcher: ItemMatcher,
    },
}

/// Reads a resource through a [`Confirm`] strategy.
pub struct ResourceReader<'a> {
    transport: &'a dyn Transport,
    confirm: Confirm,
    page_size: u32,
}

impl<'a> ResourceReader<'a> {
    pub fn new(transport: &'a dyn Transport, confirm: Confirm, page_size: u32) -> Self {
        Self {
            transport,
            confirm,
            page_size,
        }
    }

    /// The resource document, or `None` if the resource does not exist.
    pub async fn read(&self) -> Result<Option<Value>> {
        match &self.confirm {
            Confirm::DirectRead(url) => match self.transport.get(url).await {
                Ok(doc) => Ok(Some(doc)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(PollError::transport(e)),
            },
            Confirm::Listing { listing, matcher } => {
                PaginatedLocator::new(
                    self.transport,
                    listing.clone(),
                    matcher.clone(),
                    self.page_size,
                )
                .locate()
                .await
            }
        }
    }
}

/// String value at a dotted field path.
pub(crate) fn field_str<'v>(doc: &'v Value, field: &str) -> Option<&'v str> {
    doc.pointer(&format!("/{}", field.replace('.', "/")))?
        .as_str()
}

/// Whether a settled state is the one the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestingKind {
    Ready,
    Error,
}

/// States a resource can settle in. Anything not listed is transitional.
#[derive(Debug, Clone, Default)]
pub struct RestingStates {
    states: HashMap<String, RestingKind>,
}

impl RestingStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(mut self, state: impl Into<String>) -> Self {
        self.states.insert(state.into(), RestingKind::Ready);
        self
    }

    pub fn error(mut self, state: impl Into<String>) -> Self {
        self.states.insert(state.into(), RestingKind::Error);
        self
    }

    pub fn get(&self, state: &str) -> Option<RestingKind> {
        self.states.get(state).copied()
    }
}

/// Waits for a resource's state field to reach a resting state.
pub struct RestingStateProber<'a> {
    reader: ResourceReader<'a>,
    states: RestingStates,
    state_field: String,
    description: String,
}

impl<'a> RestingStateProber<'a> {
    pub fn new(
        reader: ResourceReader<'a>,
        states: RestingStates,
        state_field: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            reader,
            states,
            state_field: state_field.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
impl Prober for RestingStateProber<'_> {
    type Output = Value;

    fn description(&self) -> &str {
        &self.description
    }

    async fn probe(&mut self) -> PollVerdict<Value> {
        let doc = match self.reader.read().await {
            Ok(Some(doc)) => doc,
            Ok(None) => return PollVerdict::Failure(PollError::NotFound(self.description.clone())),
            Err(e) => return PollVerdict::Failure(e),
        };
        let Some(state) = field_str(&doc, &self.state_field).map(str::to_string) else {
            return PollVerdict::Failure(PollError::Malformed(format!(
                "{} has no {} field",
                self.description, self.state_field
            )));
        };

        match self.states.get(&state) {
            Some(RestingKind::Ready) => {
                debug!("{} settled in {}", self.description, state);
                PollVerdict::Success(doc)
            }
            Some(RestingKind::Error) => PollVerdict::Failure(PollError::ErrorState {
                resource: self.description.clone(),
                message: field_str(&doc, "statusMessage")
                    .unwrap_or_default()
                    .to_string(),
                state,
            }),
            None => PollVerdict::Pending(format!("{} has state {}", self.description, state)),
        }
    }
}

/// Presence the caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Exists,
    Absent,
}

/// Waits until a resource has been seen in the wanted presence a number of
/// consecutive times. Eventually consistent APIs can flap right after a
/// mutation, so one observation is not always enough.
pub struct ExistenceProber<'a> {
    reader: ResourceReader<'a>,
    want: Presence,
    target_occurrences: u32,
    streak: u32,
    description: String,
}

impl<'a> ExistenceProber<'a> {
    pub fn new(
        reader: ResourceReader<'a>,
        want: Presence,
        target_occurrences: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            reader,
            want,
            target_occurrences: target_occurrences.max(1),
            streak: 0,
            description: description.into(),
        }
    }
}

#[async_trait]
impl Prober for ExistenceProber<'_> {
    /// Last document read; `None` when waiting for absence.
    type Output = Option<Value>;

    fn description(&self) -> &str {
        &self.description
    }

    async fn probe(&mut self) -> PollVerdict<Option<Value>> {
        let doc = match self.reader.read().await {
            Ok(doc) => doc,
            Err(e) => return PollVerdict::Failure(e),
        };
        let seen = if doc.is_some() {
            Presence::Exists
        } else {
            Presence::Absent
        };

        if seen != self.want {
            self.streak = 0;
            return PollVerdict::Pending(format!(
                "{} is {:?}, waiting for {:?}",
                self.description, seen, self.want
            ));
        }

        self.streak += 1;
        if self.streak >= self.target_occurrences {
            PollVerdict::Success(doc)
        } else {
            PollVerdict::Pending(format!(
                "{} seen {:?} {}/{} times",
                self.description, seen, self.streak, self.target_occurrences
            ))
        }
    }
}
