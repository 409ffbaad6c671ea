//! Operation handles and the typed view of remote operation documents.
//!
//! Remote operations come back as generic JSON documents. This module is the
//! only place that picks fields out of them; everything downstream works with
//! [`OperationHandle`] and [`OperationStatus`].

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::config::ReconcilerConfig;
use crate::error::{PollError, Result};

/// Where an operation lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Zone(String),
    Region(String),
    Global,
}

impl Scope {
    /// Last path segment of a zone or region URL
    /// (`https://…/zones/us-central1-a` → `us-central1-a`).
    fn from_link(link: &str) -> String {
        link.rsplit('/').next().unwrap_or(link).to_string()
    }

    fn path(&self) -> String {
        match self {
            Scope::Zone(zone) => format!("zones/{}", zone),
            Scope::Region(region) => format!("regions/{}", region),
            Scope::Global => "global".to_string(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Zone(zone) => write!(f, "zone {}", zone),
            Scope::Region(region) => write!(f, "region {}", region),
            Scope::Global => write!(f, "global"),
        }
    }
}

/// Operation document dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `status: PENDING | RUNNING | DONE`, errors in `error.errors[]`.
    Compute,
    /// `done: bool`, `error { code, message }`, `response`.
    LongRunning,
}

/// Handle to a remote asynchronous operation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    name: String,
    kind: OperationKind,
    scope: Scope,
    project: Option<String>,
    target: String,
    description: String,
}

impl OperationHandle {
    pub fn new(
        kind: OperationKind,
        name: impl Into<String>,
        scope: Scope,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let handle = Self {
            name: name.into(),
            kind,
            scope,
            project: None,
            target: target.into(),
            description: description.into(),
        };
        handle.validate()?;
        Ok(handle)
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Build a handle from the document a mutating call returned.
    ///
    /// Compute operations carry their scope in `zone` / `region` links and
    /// are global otherwise. Long-running operation names embed their
    /// location (`projects/p/locations/l/operations/x`).
    pub fn from_response(
        kind: OperationKind,
        doc: &Value,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let handle = match kind {
            OperationKind::Compute => {
                let view: ComputeOperationView = decode(doc, "compute operation")?;
                let name = view
                    .name
                    .ok_or_else(|| PollError::Malformed("operation has no name".into()))?;
                let scope = match (view.zone, view.region) {
                    (Some(zone), _) => Scope::Zone(Scope::from_link(&zone)),
                    (None, Some(region)) => Scope::Region(Scope::from_link(&region)),
                    (None, None) => Scope::Global,
                };
                let target = view.target_link.unwrap_or_else(|| target.into());
                Self::new(kind, name, scope, target, description)?
            }
            OperationKind::LongRunning => {
                let view: LroView = decode(doc, "long-running operation")?;
                let name = view
                    .name
                    .ok_or_else(|| PollError::Malformed("operation has no name".into()))?;
                let scope = match location_of(&name) {
                    Some(loc) if loc != "global" => Scope::Region(loc.to_string()),
                    _ => Scope::Global,
                };
                Self::new(kind, name, scope, target, description)?
            }
        };
        Ok(handle)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PollError::InvalidHandle("empty operation name".into()));
        }
        if self.target.trim().is_empty() {
            return Err(PollError::InvalidHandle(format!(
                "operation {} has no target",
                self.name
            )));
        }
        match &self.scope {
            Scope::Zone(s) | Scope::Region(s) if s.trim().is_empty() => Err(
                PollError::InvalidHandle(format!("operation {} has an empty scope", self.name)),
            ),
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// URL of the status document for this operation.
    pub fn status_url(&self, config: &ReconcilerConfig) -> Result<String> {
        match self.kind {
            OperationKind::Compute => {
                let project = self
                    .project
                    .as_deref()
                    .or(config.project.as_deref())
                    .ok_or_else(|| {
                        PollError::InvalidHandle(format!(
                            "no project known for operation {}",
                            self.name
                        ))
                    })?;
                Ok(format!(
                    "{}projects/{}/{}/operations/{}",
                    config.base(),
                    project,
                    self.scope.path(),
                    self.name
                ))
            }
            OperationKind::LongRunning => Ok(format!(
                "{}{}",
                config.base(),
                self.name.trim_start_matches('/')
            )),
        }
    }
}

fn location_of(name: &str) -> Option<&str> {
    let mut parts = name.split('/');
    while let Some(part) = parts.next() {
        if part == "locations" {
            return parts.next();
        }
    }
    None
}

/// Result of a mutating call: zero or one operation handles.
#[derive(Debug, Clone, Default)]
pub struct MutationResult {
    pub operation: Option<OperationHandle>,
}

impl MutationResult {
    /// The call took effect synchronously.
    pub fn completed() -> Self {
        Self { operation: None }
    }

    pub fn pending(handle: OperationHandle) -> Self {
        Self {
            operation: Some(handle),
        }
    }
}

/// Error reported by the remote system inside a finished operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
    pub cancelled: bool,
}

/// Interpreted status of an operation document.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    InProgress(String),
    Done {
        error: Option<RemoteError>,
        response: Option<Value>,
    },
}

impl OperationStatus {
    /// Interpret a status document of the given dialect.
    pub fn parse(kind: OperationKind, doc: &Value) -> Result<Self> {
        match kind {
            OperationKind::Compute => {
                let view: ComputeOperationView = decode(doc, "compute operation")?;
                let status = view
                    .status
                    .ok_or_else(|| PollError::Malformed("operation has no status field".into()))?;
                match status.as_str() {
                    "PENDING" | "RUNNING" => Ok(OperationStatus::InProgress(status)),
                    "DONE" => {
                        let error = view
                            .error
                            .and_then(|e| e.errors.into_iter().next())
                            .map(|item| {
                                let code = item.code.unwrap_or_default();
                                RemoteError {
                                    cancelled: matches!(
                                        code.as_str(),
                                        "CANCELLED" | "OPERATION_CANCELED"
                                    ),
                                    code,
                                    message: item.message.unwrap_or_default(),
                                }
                            });
                        Ok(OperationStatus::Done {
                            error,
                            response: None,
                        })
                    }
                    other => Err(PollError::Malformed(format!(
                        "unknown operation status {:?}",
                        other
                    ))),
                }
            }
            OperationKind::LongRunning => {
                let view: LroView = decode(doc, "long-running operation")?;
                if view.name.is_none() {
                    return Err(PollError::Malformed("operation has no name".into()));
                }
                if !view.done {
                    return Ok(OperationStatus::InProgress("RUNNING".to_string()));
                }
                let error = view.error.map(|status| RemoteError {
                    cancelled: status.code == GRPC_CANCELLED,
                    code: status.code.to_string(),
                    message: status.message,
                });
                Ok(OperationStatus::Done {
                    error,
                    response: view.response,
                })
            }
        }
    }
}

const GRPC_CANCELLED: i32 = 1;

fn decode<'de, T: Deserialize<'de>>(doc: &'de Value, what: &str) -> Result<T> {
    T::deserialize(doc).map_err(|e| PollError::Malformed(format!("{}: {}", what, e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeOperationView {
    name: Option<String>,
    status: Option<String>,
    zone: Option<String>,
    region: Option<String>,
    target_link: Option<String>,
    error: Option<ComputeErrorsView>,
}

#[derive(Debug, Deserialize)]
struct ComputeErrorsView {
    #[serde(default)]
    errors: Vec<ComputeErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ComputeErrorItem {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LroView {
    name: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<LroStatusView>,
    response: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LroStatusView {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handle_requires_target_and_scope() {
        let err = OperationHandle::new(
            OperationKind::Compute,
            "op-1",
            Scope::Zone("us-central1-a".into()),
            "",
            "Creating Disk",
        )
        .unwrap_err();
        assert!(matches!(err, PollError::InvalidHandle(_)));

        let err = OperationHandle::new(
            OperationKind::Compute,
            "op-1",
            Scope::Region(" ".into()),
            "disks/d1",
            "Creating Disk",
        )
        .unwrap_err();
        assert!(matches!(err, PollError::InvalidHandle(_)));
    }

    #[test]
    fn test_compute_handle_from_response() {
        let doc = json!({
            "kind": "compute#operation",
            "name": "operation-123",
            "zone": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a",
            "targetLink": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a/disks/d1",
            "status": "RUNNING"
        });
        let handle =
            OperationHandle::from_response(OperationKind::Compute, &doc, "d1", "Creating Disk")
                .unwrap()
                .with_project("p");
        assert_eq!(handle.scope(), &Scope::Zone("us-central1-a".into()));
        assert!(handle.target().ends_with("/disks/d1"));

        let config = ReconcilerConfig::default().with_base_url("http://api.test");
        assert_eq!(
            handle.status_url(&config).unwrap(),
            "http://api.test/projects/p/zones/us-central1-a/operations/operation-123"
        );
    }

    #[test]
    fn test_global_compute_operation_uses_config_project() {
        let doc = json!({ "name": "operation-9", "status": "PENDING" });
        let handle =
            OperationHandle::from_response(OperationKind::Compute, &doc, "networks/n", "Creating")
                .unwrap();
        assert_eq!(handle.scope(), &Scope::Global);

        let config = ReconcilerConfig::default().with_base_url("http://api.test/");
        assert!(matches!(
            handle.status_url(&config),
            Err(PollError::InvalidHandle(_))
        ));
        let config = config.with_project("proj");
        assert_eq!(
            handle.status_url(&config).unwrap(),
            "http://api.test/projects/proj/global/operations/operation-9"
        );
    }

    #[test]
    fn test_lro_handle_location() {
        let doc = json!({ "name": "projects/p/locations/europe-west1/operations/abc" });
        let handle = OperationHandle::from_response(
            OperationKind::LongRunning,
            &doc,
            "tagBindings/x",
            "Creating LocationTagBinding",
        )
        .unwrap();
        assert_eq!(handle.scope(), &Scope::Region("europe-west1".into()));

        let config = ReconcilerConfig::default().with_base_url("http://api.test/v1");
        assert_eq!(
            handle.status_url(&config).unwrap(),
            "http://api.test/v1/projects/p/locations/europe-west1/operations/abc"
        );
    }

    #[test]
    fn test_compute_status_with_errors() {
        let doc = json!({
            "name": "op",
            "status": "DONE",
            "error": { "errors": [{ "code": "QUOTA_EXCEEDED", "message": "too many disks" }] }
        });
        match OperationStatus::parse(OperationKind::Compute, &doc).unwrap() {
            OperationStatus::Done {
                error: Some(err), ..
            } => {
                assert_eq!(err.code, "QUOTA_EXCEEDED");
                assert!(!err.cancelled);
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[test]
    fn test_compute_status_missing_or_unknown() {
        let missing = OperationStatus::parse(OperationKind::Compute, &json!({ "name": "op" }));
        assert!(matches!(missing, Err(PollError::Malformed(_))));

        let unknown =
            OperationStatus::parse(OperationKind::Compute, &json!({ "status": "EXPLODED" }));
        assert!(matches!(unknown, Err(PollError::Malformed(_))));

        let wrong_type = OperationStatus::parse(OperationKind::Compute, &json!({ "status": 3 }));
        assert!(matches!(wrong_type, Err(PollError::Malformed(_))));
    }

    #[test]
    fn test_lro_status() {
        let running = json!({ "name": "operations/x" });
        assert_eq!(
            OperationStatus::parse(OperationKind::LongRunning, &running).unwrap(),
            OperationStatus::InProgress("RUNNING".into())
        );

        let cancelled = json!({
            "name": "operations/x",
            "done": true,
            "error": { "code": 1, "message": "Operation cancelled" }
        });
        match OperationStatus::parse(OperationKind::LongRunning, &cancelled).unwrap() {
            OperationStatus::Done {
                error: Some(err), ..
            } => assert!(err.cancelled),
            other => panic!("unexpected status: {:?}", other),
        }

        let done = json!({ "name": "operations/x", "done": true, "response": { "id": 7 } });
        assert_eq!(
            OperationStatus::parse(OperationKind::LongRunning, &done).unwrap(),
            OperationStatus::Done {
                error: None,
                response: Some(json!({ "id": 7 }))
            }
        );
    }
}
