//! devkube core: object identity, reported status, and the client seams the
//! readiness engine is written against.

#![forbid(unsafe_code)]

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

mod dynamic;

pub use dynamic::GroupKindResolver;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client communication failure other than "not found" / "already exists".
    #[error("client request failed: {0}")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("could not decode {field}: {source}")]
    MalformedStatus {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not determine kind for object {0}")]
    UnresolvableKind(String),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// The poller's own max wait ran out.
    #[error("set deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn client<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Client(err.into())
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Error::DeadlineExceeded(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Identity of a single remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub generation: i64,
}

impl ObjectRef {
    pub fn new(gvk_key: &str, namespace: Option<&str>, name: &str) -> Result<Self> {
        let (group, version, kind) = parse_gvk_key(gvk_key)?;
        Ok(Self {
            group,
            version,
            kind,
            namespace: namespace.map(|s| s.to_string()),
            name: name.to_string(),
            generation: 0,
        })
    }

    /// `group.Kind`, or just `Kind` for the core group. Used as registry key.
    pub fn group_kind(&self) -> String {
        group_kind(&self.group, &self.kind)
    }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) => write!(f, "{} {}/{}", self.gvk_key(), ns, self.name),
            None => write!(f, "{} {}", self.gvk_key(), self.name),
        }
    }
}

pub fn group_kind(group: &str, kind: &str) -> String {
    if group.is_empty() {
        kind.to_string()
    } else {
        format!("{}.{}", group, kind)
    }
}

/// Parse `v1/Kind` or `group/v1/Kind` into `(group, version, kind)`.
pub fn parse_gvk_key(key: &str) -> Result<(String, String, String)> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok((String::new(), (*version).to_string(), (*kind).to_string()))
        }
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(((*group).to_string(), (*version).to_string(), (*kind).to_string()))
        }
        _ => Err(Error::InvalidObject(format!(
            "invalid gvk key: {} (expect v1/Kind or group/v1/Kind)",
            key
        ))),
    }
}

/// Status of a condition. Values outside `True`/`False`/`Unknown` decode as
/// `Other` so one odd condition does not spoil the rest of the list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
    Other(String),
}

impl From<String> for ConditionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            "Unknown" => ConditionStatus::Unknown,
            _ => ConditionStatus::Other(s),
        }
    }
}

impl From<ConditionStatus> for String {
    fn from(status: ConditionStatus) -> Self {
        match status {
            ConditionStatus::Other(s) => s,
            known => known.to_string(),
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => f.write_str("True"),
            ConditionStatus::False => f.write_str("False"),
            ConditionStatus::Unknown => f.write_str("Unknown"),
            ConditionStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Strict: only the three standard values are accepted as a wanted status.
impl std::str::FromStr for ConditionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "True" => Ok(ConditionStatus::True),
            "False" => Ok(ConditionStatus::False),
            "Unknown" => Ok(ConditionStatus::Unknown),
            other => Err(Error::InvalidObject(format!("unknown condition status: {}", other))),
        }
    }
}

/// Minimal condition shape shared by built-in kinds and CRDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The parts of `.status` the engine reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedStatus {
    pub observed_generation: Option<i64>,
    pub conditions: Option<Vec<Condition>>,
}

impl ReportedStatus {
    pub fn find(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions.as_deref()?.iter().find(|c| c.type_ == condition_type)
    }
}

/// Structural access to an object's generation and reported status.
pub trait ConditionReader {
    fn generation(&self) -> i64;
    fn reported_status(&self) -> Result<ReportedStatus>;
}

pub trait ApiObject: ConditionReader + Clone + Send + Sync + 'static {
    fn object_ref(&self) -> Result<ObjectRef>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Created {
    Fresh,
    AlreadyExists,
}

/// Remote object access. Must be safe to share between concurrent waits.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    type Object: ApiObject;

    async fn get(&self, target: &ObjectRef) -> Result<Lookup<Self::Object>>;
    async fn create(&self, object: &Self::Object) -> Result<Created>;
}

/// Maps an object to the identity string used for readiness lookups.
pub trait KindResolver<O>: Send + Sync {
    fn kind_of(&self, object: &O) -> Result<String>;
}

/// One "is this true yet" question. `Ok(false)` means keep polling.
#[async_trait]
pub trait Check: Send + Sync {
    async fn check(&self, cancel: &CancellationToken) -> Result<bool>;
}

/// Evaluates an already-fetched object.
pub type ObjectCheck<O> = Arc<dyn Fn(&O) -> Result<bool> + Send + Sync>;

/// Adapter turning a closure into a [`Check`].
pub struct FnCheck<F>(F);

pub fn check_fn<F, Fut>(f: F) -> FnCheck<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    FnCheck(f)
}

#[async_trait]
impl<F, Fut> Check for FnCheck<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    async fn check(&self, cancel: &CancellationToken) -> Result<bool> {
        (self.0)(cancel.clone()).await
    }
}
