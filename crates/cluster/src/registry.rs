//! Per-kind readiness checks.

use std::collections::BTreeMap;
use std::fmt;

use devkube_check::condition_status_is;
use devkube_core::{ConditionReader, ConditionStatus, ObjectCheck};

pub const DEPLOYMENT: &str = "apps.Deployment";
pub const CUSTOM_RESOURCE_DEFINITION: &str = "apiextensions.k8s.io.CustomResourceDefinition";

/// Result of looking a kind up in [`ReadinessChecks`].
pub enum Readiness<'a, O> {
    /// All of these must pass.
    Checks(&'a [ObjectCheck<O>]),
    /// Registered as needing no wait beyond creation.
    NoWait,
    /// Not registered; treated like `NoWait`.
    Unregistered,
}

impl<O> Readiness<'_, O> {
    pub fn needs_wait(&self) -> bool {
        matches!(self, Readiness::Checks(_))
    }
}

/// Kind identity (`group.Kind`) to the object checks that define "ready".
/// Iterates in kind order.
pub struct ReadinessChecks<O> {
    by_kind: BTreeMap<String, Vec<ObjectCheck<O>>>,
}

impl<O> Clone for ReadinessChecks<O> {
    fn clone(&self) -> Self {
        Self { by_kind: self.by_kind.clone() }
    }
}

impl<O> fmt::Debug for ReadinessChecks<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.by_kind.iter().map(|(k, v)| (k, v.len()))).finish()
    }
}

impl<O> ReadinessChecks<O> {
    /// Empty set. Passing it to [`ReadinessChecks::default_or_override`]
    /// selects the built-in set.
    pub fn new() -> Self {
        Self { by_kind: BTreeMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn insert(&mut self, kind: impl Into<String>, checks: Vec<ObjectCheck<O>>) {
        self.by_kind.insert(kind.into(), checks);
    }

    pub fn with(mut self, kind: impl Into<String>, checks: Vec<ObjectCheck<O>>) -> Self {
        self.insert(kind, checks);
        self
    }

    /// Mark a kind as deliberately needing no readiness wait.
    pub fn no_wait(self, kind: impl Into<String>) -> Self {
        self.with(kind, Vec::new())
    }

    pub fn lookup(&self, kind: &str) -> Readiness<'_, O> {
        match self.by_kind.get(kind) {
            Some(checks) if checks.is_empty() => Readiness::NoWait,
            Some(checks) => Readiness::Checks(checks),
            None => Readiness::Unregistered,
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.by_kind.keys().map(|k| k.as_str())
    }
}

impl<O> Default for ReadinessChecks<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ConditionReader + 'static> ReadinessChecks<O> {
    /// Deployments wait for `Available=True`, CRDs for `Established=True`.
    pub fn builtin() -> Self {
        Self::new()
            .with(DEPLOYMENT, vec![condition_status_is("Available", ConditionStatus::True)])
            .with(CUSTOM_RESOURCE_DEFINITION, vec![condition_status_is("Established", ConditionStatus::True)])
    }

    pub fn default_or_override(explicit: Self) -> Self {
        if explicit.is_empty() {
            Self::builtin()
        } else {
            explicit
        }
    }
}
