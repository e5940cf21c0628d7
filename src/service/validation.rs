//! Request validation: object names, labels, and the identity fields a client may not change.

use crate::error::AppError;
use crate::model::GenericObject;
use crate::scope::Scope;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_PART_LEN: usize = 63;

fn subdomain() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("static regex")
    })
}

fn label_part() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").expect("static regex"))
}

pub struct RequestValidator;

impl RequestValidator {
    /// Object names are DNS-1123 subdomains.
    pub fn name(name: &str) -> Result<(), AppError> {
        if name.is_empty() {
            return Err(AppError::BadRequest("metadata.name is required".into()));
        }
        if name.len() > MAX_NAME_LEN || !subdomain().is_match(name) {
            return Err(AppError::BadRequest(format!(
                "invalid name '{}': must be a lowercase DNS-1123 subdomain of at most {} characters",
                name, MAX_NAME_LEN
            )));
        }
        Ok(())
    }

    /// Keys are `[prefix/]name` with a subdomain prefix; names and values are at most 63 characters.
    pub fn labels(labels: &BTreeMap<String, String>) -> Result<(), AppError> {
        for (key, value) in labels {
            let name = match key.split_once('/') {
                Some((prefix, name)) => {
                    if prefix.len() > MAX_NAME_LEN || !subdomain().is_match(prefix) {
                        return Err(AppError::BadRequest(format!("invalid label key prefix in '{}'", key)));
                    }
                    name
                }
                None => key.as_str(),
            };
            if name.is_empty() || name.len() > MAX_LABEL_PART_LEN || !label_part().is_match(name) {
                return Err(AppError::BadRequest(format!("invalid label key '{}'", key)));
            }
            if value.len() > MAX_LABEL_PART_LEN || !label_part().is_match(value) {
                return Err(AppError::BadRequest(format!("invalid value for label '{}': '{}'", key, value)));
            }
        }
        Ok(())
    }

    /// The path name, when present, must match the body; a body may not name another owner.
    pub fn identity(resource: &str, scope: &Scope, path_name: Option<&str>, meta_name: &str, meta_user: Option<&str>) -> Result<(), AppError> {
        if let Some(path_name) = path_name {
            if path_name != meta_name {
                return Err(AppError::BadRequest(format!(
                    "metadata.name '{}' does not match '{}' in the path",
                    meta_name, path_name
                )));
            }
        }
        if meta_user.is_some() && Scope::from_user(meta_user) != *scope {
            return Err(AppError::forbidden(
                resource,
                meta_name,
                format!("metadata.user names {} but the request is at {} scope", Scope::from_user(meta_user), scope),
            ));
        }
        Ok(())
    }

    /// Full check of a written object. `path_name` is the `{name}` segment for updates.
    pub fn object(resource: &str, scope: &Scope, object: &GenericObject, path_name: Option<&str>) -> Result<(), AppError> {
        Self::name(object.name())?;
        Self::identity(resource, scope, path_name, object.name(), object.metadata.user.as_deref())?;
        Self::labels(object.labels())?;
        match &object.spec {
            Value::Object(_) | Value::Null => Ok(()),
            _ => Err(AppError::BadRequest("spec must be a JSON object".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_follow_dns_subdomain_rules() {
        for ok in ["smtp", "smtp-default", "a.b-c.d", "0x"] {
            RequestValidator::name(ok).unwrap();
        }
        for bad in ["", "Upper", "-lead", "trail-", "under_score", "a..b"] {
            assert!(RequestValidator::name(bad).is_err(), "{} should be rejected", bad);
        }
        assert!(RequestValidator::name(&"a".repeat(254)).is_err());
    }

    #[test]
    fn labels_are_checked() {
        let ok: BTreeMap<_, _> = [("notification/config-name", "smtp"), ("tier", ""), ("app.kubernetes.io/name", "x_y.z")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RequestValidator::labels(&ok).unwrap();
        for (k, v) in [("", "x"), ("bad key", "x"), ("ok", "bad value"), ("Bad_Prefix/x", "y")] {
            let labels = BTreeMap::from([(k.to_string(), v.to_string())]);
            assert!(RequestValidator::labels(&labels).is_err(), "{}={} should be rejected", k, v);
        }
    }

    #[test]
    fn identity_rules() {
        let alice = Scope::tenant("alice");
        let obj = GenericObject::new("hook", &alice, json!({}));
        RequestValidator::object("webhookreceivers", &alice, &obj, Some("hook")).unwrap();
        assert!(matches!(
            RequestValidator::object("webhookreceivers", &alice, &obj, Some("other")),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            RequestValidator::object("webhookreceivers", &Scope::Global, &obj, None),
            Err(AppError::Forbidden { .. })
        ));
        // No owner in the body is fine; the request scope supplies it.
        let ownerless = GenericObject::new("hook", &Scope::Global, json!({}));
        RequestValidator::object("webhookreceivers", &alice, &ownerless, None).unwrap();

        let bad_spec = GenericObject::new("hook", &Scope::Global, json!([1, 2]));
        assert!(RequestValidator::object("webhookreceivers", &Scope::Global, &bad_spec, None).is_err());
    }
}
