//! Request scope: the cluster-global partition or a single user's partition.

use crate::error::AppError;
use crate::registry::{ResourceKind, ScopeClass};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Path segment that introduces a user-scoped request: `/users/{user}/...`.
pub const USERS_SEGMENT: &str = "users";

/// Owner partition of an object. Immutable once the object exists.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    #[default]
    Global,
    Tenant(String),
}

impl Scope {
    pub fn tenant(user: impl Into<String>) -> Self {
        Scope::Tenant(user.into())
    }

    /// Scope for an optional owning user, as stored on object metadata.
    pub fn from_user(user: Option<&str>) -> Self {
        match user {
            Some(u) => Scope::Tenant(u.to_string()),
            None => Scope::Global,
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            Scope::Global => None,
            Scope::Tenant(u) => Some(u.as_str()),
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Tenant(u) => write!(f, "user '{}'", u),
        }
    }
}

fn user_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex"))
}

pub struct ScopeResolver;

impl ScopeResolver {
    /// Resolve the scope of a request path relative to the API root.
    /// `/users/{user}/...` is that user's scope; every other path is global.
    pub fn resolve(path: &str) -> Result<Scope, AppError> {
        let mut segments = path.trim_start_matches('/').split('/');
        match segments.next() {
            Some(USERS_SEGMENT) => {
                let user = segments.next().unwrap_or_default();
                Self::from_user(Some(user))
            }
            _ => Ok(Scope::Global),
        }
    }

    /// Scope for an already-extracted `{user}` path parameter. The identifier must be a DNS-1123 label.
    pub fn from_user(user: Option<&str>) -> Result<Scope, AppError> {
        match user {
            None => Ok(Scope::Global),
            Some(u) if u.len() <= 63 && user_pattern().is_match(u) => Ok(Scope::tenant(u)),
            Some(u) => Err(AppError::BadRequest(format!("invalid user name: '{}'", u))),
        }
    }

    /// Reject a scope the kind's scope class does not serve.
    pub fn check(kind: &ResourceKind, scope: &Scope) -> Result<(), AppError> {
        let supported = match (&kind.scope_class, scope) {
            (ScopeClass::Both, _) => true,
            (ScopeClass::Global, Scope::Global) => true,
            (ScopeClass::Tenant, Scope::Tenant(_)) => true,
            _ => false,
        };
        if supported {
            Ok(())
        } else {
            Err(AppError::ScopeNotSupported {
                kind: kind.id.clone(),
                scope: scope.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Channel, Shape};

    fn kind(scope_class: ScopeClass) -> ResourceKind {
        ResourceKind::new(Channel::Email, Shape::Receiver, scope_class)
    }

    #[test]
    fn resolves_global_and_user_paths() {
        assert_eq!(ScopeResolver::resolve("/emailconfigs").unwrap(), Scope::Global);
        assert_eq!(ScopeResolver::resolve("/emailconfigs/smtp").unwrap(), Scope::Global);
        assert_eq!(ScopeResolver::resolve("/secrets/s1").unwrap(), Scope::Global);
        assert_eq!(
            ScopeResolver::resolve("/users/alice/emailreceivers/r1").unwrap(),
            Scope::tenant("alice")
        );
        assert!(ScopeResolver::resolve("/users//emailreceivers").is_err());
        assert!(ScopeResolver::resolve("/users/Not_Valid/emailreceivers").is_err());
    }

    #[test]
    fn check_enforces_scope_class() {
        let global_only = kind(ScopeClass::Global);
        let tenant_only = kind(ScopeClass::Tenant);
        let both = kind(ScopeClass::Both);
        let alice = Scope::tenant("alice");

        assert!(ScopeResolver::check(&global_only, &Scope::Global).is_ok());
        assert!(matches!(
            ScopeResolver::check(&global_only, &alice),
            Err(AppError::ScopeNotSupported { .. })
        ));
        assert!(ScopeResolver::check(&tenant_only, &alice).is_ok());
        assert!(matches!(
            ScopeResolver::check(&tenant_only, &Scope::Global),
            Err(AppError::ScopeNotSupported { .. })
        ));
        assert!(ScopeResolver::check(&both, &Scope::Global).is_ok());
        assert!(ScopeResolver::check(&both, &alice).is_ok());
    }
}
