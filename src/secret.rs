//! Secrets and the binder that keeps a config's credentials out of its body.
//!
//! A config's secret is a separate object in the same owner scope, named `<resource>-<config>`.
//! On write, sensitive spec fields are moved into it; on read, it is returned next to the config in a
//! `secret` field with its values masked. Plain values are only readable through `/secrets`.

use crate::error::AppError;
use crate::model::{GenericObject, ObjectMeta};
use crate::registry::ResourceKind;
use crate::scope::Scope;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Placeholder shown instead of secret values. Sending it back on update keeps the stored value.
pub const MASK: &str = "******";
pub const LABEL_CONFIG_KIND: &str = "notification/config-kind";
pub const LABEL_CONFIG_NAME: &str = "notification/config-name";
const SECRET_KIND: &str = "Secret";
const DEFAULT_TYPE: &str = "Opaque";

fn default_type() -> String {
    DEFAULT_TYPE.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(rename = "type", default = "default_type")]
    pub type_: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Default for Secret {
    fn default() -> Self {
        Secret {
            metadata: ObjectMeta::default(),
            type_: default_type(),
            data: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
struct SecretBody {
    #[serde(rename = "type", default = "default_type")]
    type_: String,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

impl Secret {
    pub fn owner(&self) -> Scope {
        Scope::from_user(self.metadata.user.as_deref())
    }

    pub fn into_object(self) -> GenericObject {
        GenericObject {
            kind: SECRET_KIND.to_string(),
            metadata: self.metadata,
            spec: json!({ "type": self.type_, "data": self.data }),
            status: None,
        }
    }

    pub fn from_object(object: GenericObject) -> Result<Self, AppError> {
        let body: SecretBody = serde_json::from_value(object.spec)
            .map_err(|e| AppError::Internal(format!("stored secret '{}' is malformed: {}", object.metadata.name, e)))?;
        Ok(Secret {
            metadata: object.metadata,
            type_: body.type_,
            data: body.data,
        })
    }

    /// Same secret with every value replaced by the mask.
    pub fn redacted(mut self) -> Self {
        for value in self.data.values_mut() {
            *value = MASK.to_string();
        }
        self
    }

    /// Replace masked values with the stored ones. A masked key with nothing stored is dropped.
    fn unmask(&mut self, stored: Option<&Secret>) {
        self.data.retain(|key, value| {
            if value != MASK {
                return true;
            }
            match stored.and_then(|s| s.data.get(key)) {
                Some(original) => {
                    *value = original.clone();
                    true
                }
                None => false,
            }
        });
    }
}

/// A config as exchanged with clients: the object plus its (optional) secret.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigWithSecret {
    #[serde(flatten)]
    pub object: GenericObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
}

impl ConfigWithSecret {
    pub fn redacted(self) -> Self {
        ConfigWithSecret {
            object: self.object,
            secret: self.secret.map(Secret::redacted),
        }
    }
}

/// What a config write asks of its secret, before looking at what is stored.
#[derive(Clone, Debug, PartialEq)]
pub enum SecretChange {
    /// No `secret` field and no inline credentials.
    Unchanged,
    /// An explicitly empty `secret`.
    Remove,
    /// The stored secret becomes exactly this one.
    Replace(Secret),
    /// Inline credentials without a `secret` field: overlay onto what is stored.
    Merge(Secret),
}

/// The store operation a [`SecretChange`] resolves to.
#[derive(Clone, Debug, PartialEq)]
pub enum SecretWrite {
    Leave,
    Delete,
    Put(Secret),
}

impl SecretChange {
    pub fn resolve(self, stored: Option<&Secret>) -> SecretWrite {
        match self {
            SecretChange::Unchanged => SecretWrite::Leave,
            SecretChange::Remove if stored.is_some() => SecretWrite::Delete,
            SecretChange::Remove => SecretWrite::Leave,
            SecretChange::Replace(mut secret) => {
                secret.unmask(stored);
                match (secret.data.is_empty(), stored.is_some()) {
                    (false, _) => SecretWrite::Put(secret),
                    (true, true) => SecretWrite::Delete,
                    (true, false) => SecretWrite::Leave,
                }
            }
            SecretChange::Merge(mut secret) => {
                secret.unmask(stored);
                if let Some(stored) = stored {
                    let mut data = stored.data.clone();
                    data.extend(secret.data);
                    secret.data = data;
                    secret.type_ = stored.type_.clone();
                }
                SecretWrite::Put(secret)
            }
        }
    }
}

/// Moves credentials between a config and its secret.
pub struct SecretBinder;

impl SecretBinder {
    /// Name of the secret bound to config `name` of `kind`, within the config's owner scope.
    pub fn secret_name(kind: &ResourceKind, name: &str) -> String {
        format!("{}-{}", kind.id, name)
    }

    /// Skeleton of the secret bound to `config`: derived name, same owner, binding labels.
    fn bound_secret(kind: &ResourceKind, config: &GenericObject, type_: String, data: BTreeMap<String, String>) -> Secret {
        let mut metadata = ObjectMeta {
            name: Self::secret_name(kind, config.name()),
            ..ObjectMeta::default()
        };
        metadata.user = config.metadata.user.clone();
        metadata.labels.insert(LABEL_CONFIG_KIND.to_string(), kind.id.clone());
        metadata.labels.insert(LABEL_CONFIG_NAME.to_string(), config.name().to_string());
        Secret { metadata, type_, data }
    }

    /// Split a client-supplied config into the object to store and the change to its secret.
    ///
    /// Sensitive top-level spec fields (plain strings, or `{"value": "..."}`) are removed from the body.
    /// Values in the request's `secret` win over inline ones for the same key.
    pub fn split(kind: &ResourceKind, input: ConfigWithSecret) -> Result<(GenericObject, SecretChange), AppError> {
        let ConfigWithSecret { mut object, secret } = input;
        if !kind.is_config() {
            if secret.is_some() {
                return Err(AppError::BadRequest(format!("{} do not carry secrets", kind.id)));
            }
            return Ok((object, SecretChange::Unchanged));
        }

        let owner = object.owner();
        if let Some(requested) = secret.as_ref().filter(|s| s.metadata.user.is_some()) {
            if requested.owner() != owner {
                return Err(AppError::SecretScopeMismatch {
                    config: object.name().to_string(),
                    secret_owner: requested.owner(),
                    config_owner: owner,
                });
            }
        }

        let mut inline = BTreeMap::new();
        if let Value::Object(spec) = &mut object.spec {
            for field in &kind.sensitive_fields {
                let value = match spec.get(field) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Object(o)) => match o.get("value") {
                        Some(Value::String(s)) => s.clone(),
                        _ => continue,
                    },
                    _ => continue,
                };
                spec.remove(field);
                inline.insert(field.clone(), value);
            }
        }

        let change = match secret {
            None if inline.is_empty() => SecretChange::Unchanged,
            None => SecretChange::Merge(Self::bound_secret(kind, &object, default_type(), inline)),
            Some(requested) if requested.data.is_empty() && inline.is_empty() => SecretChange::Remove,
            Some(requested) => {
                let mut data = inline;
                data.extend(requested.data);
                SecretChange::Replace(Self::bound_secret(kind, &object, requested.type_, data))
            }
        };
        Ok((object, change))
    }

    /// Pair a stored config with its stored secret. The secret must share the config's owner.
    pub fn attach(config: GenericObject, secret: Option<Secret>) -> Result<ConfigWithSecret, AppError> {
        if let Some(secret) = &secret {
            if secret.owner() != config.owner() {
                return Err(AppError::SecretScopeMismatch {
                    config: config.name().to_string(),
                    secret_owner: secret.owner(),
                    config_owner: config.owner(),
                });
            }
        }
        Ok(ConfigWithSecret { object: config, secret })
    }
}
