//! Kind-erased object view shared by every resource kind.

use crate::scope::Scope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Required on write; checked by request validation rather than by deserialization.
    #[serde(default)]
    pub name: String,
    /// Owning user; absent for global objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Store revision of the last write. Zero means "unset" (create, or unconditional update).
    #[serde(
        default,
        skip_serializing_if = "is_zero",
        serialize_with = "serialize_version",
        deserialize_with = "deserialize_version"
    )]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn serialize_version<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

/// Accepts the version as a decimal string (as written) or a bare number.
fn deserialize_version<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(0),
        Value::String(s) if s.is_empty() => Ok(0),
        Value::String(s) => s
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("resourceVersion must be numeric, got '{}'", s))),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("resourceVersion must be a non-negative integer")),
        other => Err(serde::de::Error::custom(format!(
            "resourceVersion must be a string or number, got {}",
            other
        ))),
    }
}

/// One resource instance. `spec` is the kind-specific payload; the generic layer never looks inside it
/// except to move a config's sensitive fields into its secret.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericObject {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl GenericObject {
    pub fn new(name: impl Into<String>, owner: &Scope, spec: Value) -> Self {
        GenericObject {
            kind: String::new(),
            metadata: ObjectMeta {
                name: name.into(),
                user: owner.user().map(str::to_string),
                ..ObjectMeta::default()
            },
            spec,
            status: None,
        }
    }

    pub fn with_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata.labels = labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn owner(&self) -> Scope {
        Scope::from_user(self.metadata.user.as_deref())
    }

    pub fn set_owner(&mut self, owner: &Scope) {
        self.metadata.user = owner.user().map(str::to_string);
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp
    }

    pub fn resource_version(&self) -> u64 {
        self.metadata.resource_version
    }
}

/// One page of a list response plus the number of matches before paging.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    pub items: Vec<T>,
    pub total_items: usize,
}

impl<T> ListResult<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListResult<U> {
        ListResult {
            items: self.items.into_iter().map(f).collect(),
            total_items: self.total_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resource_version_accepts_string_or_number() {
        let a: GenericObject =
            serde_json::from_value(json!({ "metadata": { "name": "a", "resourceVersion": "42" } })).unwrap();
        let b: GenericObject =
            serde_json::from_value(json!({ "metadata": { "name": "b", "resourceVersion": 7 } })).unwrap();
        let c: GenericObject = serde_json::from_value(json!({ "metadata": { "name": "c" } })).unwrap();
        assert_eq!(a.resource_version(), 42);
        assert_eq!(b.resource_version(), 7);
        assert_eq!(c.resource_version(), 0);
        assert!(serde_json::from_value::<GenericObject>(
            json!({ "metadata": { "name": "d", "resourceVersion": "x1" } })
        )
        .is_err());
    }

    #[test]
    fn owner_round_trips_through_metadata() {
        let obj = GenericObject::new("r1", &Scope::tenant("bob"), json!({}));
        assert_eq!(obj.owner(), Scope::tenant("bob"));
        let wire = serde_json::to_value(&obj).unwrap();
        assert_eq!(wire["metadata"]["user"], "bob");
        let global = GenericObject::new("r2", &Scope::Global, Value::Null);
        let wire = serde_json::to_value(&global).unwrap();
        assert!(wire["metadata"].get("user").is_none());
        assert!(wire.get("spec").is_none());
    }
}
