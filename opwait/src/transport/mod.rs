//! Read-only access to the remote control plane.
//!
//! Probers, the locator and the deletion watcher only ever issue GETs
//! through [`Transport`]. The HTTP implementation lives in [`http`]; tests
//! substitute scripted fakes.

pub mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

pub use http::{HttpTransport, HttpTransportConfig};

/// One read request against the remote system.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the JSON document at `url`.
    async fn get(&self, url: &str) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn get(&self, url: &str) -> Result<Value, TransportError> {
        (**self).get(url).await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted transport for unit tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    /// Replays queued responses per URL. The last queued response for a URL
    /// repeats forever once the queue is down to it.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<HashMap<String, VecDeque<Result<Value, TransportError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, url: &str, response: Result<Value, TransportError>) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(response);
            self
        }

        pub fn ok(&self, url: &str, doc: Value) -> &Self {
            self.push(url, Ok(doc))
        }

        pub fn err(&self, url: &str, err: TransportError) -> &Self {
            self.push(url, Err(err))
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str) -> Result<Value, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            let mut responses = self.responses.lock().unwrap();
            let queue = responses
                .get_mut(url)
                .unwrap_or_else(|| panic!("no scripted response for {}", url));
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        }
    }
}
