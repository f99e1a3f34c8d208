//! `DynamicObject` adapters: identity, kind resolution and status decoding.

use kube::core::DynamicObject;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::{group_kind, ApiObject, Condition, ConditionReader, Error, KindResolver, ObjectRef, ReportedStatus, Result};

fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

fn decode_field<T: DeserializeOwned>(status: &Json, key: &str, field: &'static str) -> Result<Option<T>> {
    match status.get(key) {
        None | Some(Json::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|source| Error::MalformedStatus { field, source }),
    }
}

impl ConditionReader for DynamicObject {
    fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    fn reported_status(&self) -> Result<ReportedStatus> {
        let status = match self.data.get("status") {
            Some(s) if s.is_object() => s,
            _ => return Ok(ReportedStatus::default()),
        };
        let observed_generation = decode_field::<i64>(status, "observedGeneration", ".status.observedGeneration")?;
        let conditions = decode_field::<Vec<Condition>>(status, "conditions", ".status.conditions")?;
        Ok(ReportedStatus { observed_generation, conditions })
    }
}

impl ApiObject for DynamicObject {
    fn object_ref(&self) -> Result<ObjectRef> {
        let types = self
            .types
            .as_ref()
            .ok_or_else(|| Error::InvalidObject("object missing apiVersion/kind".into()))?;
        let name = self
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::InvalidObject(format!("{} missing metadata.name", types.kind)))?;
        let (group, version) = split_api_version(&types.api_version);
        Ok(ObjectRef {
            group,
            version,
            kind: types.kind.clone(),
            namespace: self.metadata.namespace.clone(),
            name,
            generation: self.generation(),
        })
    }
}

/// Resolves `group.Kind` from the object's own `apiVersion`/`kind`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupKindResolver;

impl KindResolver<DynamicObject> for GroupKindResolver {
    fn kind_of(&self, object: &DynamicObject) -> Result<String> {
        let types = object.types.as_ref().ok_or_else(|| {
            Error::UnresolvableKind(object.metadata.name.clone().unwrap_or_else(|| "<unnamed>".into()))
        })?;
        let (group, _) = split_api_version(&types.api_version);
        Ok(group_kind(&group, &types.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConditionStatus;

    fn obj(v: Json) -> DynamicObject {
        serde_json::from_value(v).expect("valid object")
    }

    #[test]
    fn reads_generation_and_conditions() {
        let d = obj(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "default", "generation": 3 },
            "status": {
                "observedGeneration": 3,
                "conditions": [
                    { "type": "Progressing", "status": "True" },
                    { "type": "Available", "status": "False", "reason": "MinimumReplicasUnavailable" }
                ]
            }
        }));
        assert_eq!(d.generation(), 3);
        let st = d.reported_status().unwrap();
        assert_eq!(st.observed_generation, Some(3));
        assert_eq!(st.find("Available").map(|c| c.status.clone()), Some(ConditionStatus::False));
        assert!(st.find("Ready").is_none());
    }

    #[test]
    fn missing_status_is_empty_not_error() {
        let d = obj(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cfg" }
        }));
        assert_eq!(d.generation(), 0);
        assert_eq!(d.reported_status().unwrap(), ReportedStatus::default());
    }

    #[test]
    fn malformed_conditions_are_errors() {
        let d = obj(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web" },
            "status": { "conditions": "nope" }
        }));
        let err = d.reported_status().unwrap_err();
        assert!(matches!(err, Error::MalformedStatus { field: ".status.conditions", .. }), "err={}", err);
    }

    #[test]
    fn malformed_observed_generation_is_error() {
        let d = obj(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web" },
            "status": { "observedGeneration": "three" }
        }));
        assert!(matches!(
            d.reported_status(),
            Err(Error::MalformedStatus { field: ".status.observedGeneration", .. })
        ));
    }

    #[test]
    fn object_ref_and_kind_from_types() {
        let d = obj(serde_json::json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": "widgets.example.com", "generation": 1 }
        }));
        let r = d.object_ref().unwrap();
        assert_eq!(r.group, "apiextensions.k8s.io");
        assert_eq!(r.version, "v1");
        assert_eq!(r.namespace, None);
        assert_eq!(r.generation, 1);
        assert_eq!(
            GroupKindResolver.kind_of(&d).unwrap(),
            "apiextensions.k8s.io.CustomResourceDefinition"
        );
    }

    #[test]
    fn object_without_types_cannot_be_resolved() {
        let mut d = obj(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cfg" }
        }));
        d.types = None;
        assert!(matches!(GroupKindResolver.kind_of(&d), Err(Error::UnresolvableKind(_))));
        assert!(matches!(d.object_ref(), Err(Error::InvalidObject(_))));
    }
}
