//! Resource registry: the fixed catalog of notification kinds, keyed by the URL segment that names them.

use crate::error::{AppError, ConfigError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which scopes a kind may be served at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeClass {
    Global,
    Tenant,
    Both,
}

/// Object shape: a config (how delivery authenticates/formats) or a receiver (where it goes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Config,
    Receiver,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    DingTalk,
    Email,
    Slack,
    Webhook,
    WeChat,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::DingTalk,
        Channel::Email,
        Channel::Slack,
        Channel::Webhook,
        Channel::WeChat,
    ];

    /// Lowercase prefix used in resource identifiers.
    pub fn prefix(&self) -> &'static str {
        match self {
            Channel::DingTalk => "dingtalk",
            Channel::Email => "email",
            Channel::Slack => "slack",
            Channel::Webhook => "webhook",
            Channel::WeChat => "wechat",
        }
    }

    fn kind_prefix(&self) -> &'static str {
        match self {
            Channel::DingTalk => "DingTalk",
            Channel::Email => "Email",
            Channel::Slack => "Slack",
            Channel::Webhook => "Webhook",
            Channel::WeChat => "Wechat",
        }
    }

    /// Top-level config spec fields that hold credentials and live in the config's secret.
    pub fn sensitive_fields(&self) -> &'static [&'static str] {
        match self {
            Channel::DingTalk => &["appKey", "appSecret"],
            Channel::Email => &["authPassword", "authSecret"],
            Channel::Slack => &["slackTokenSecret"],
            Channel::Webhook => &["bearerToken", "basicAuthPassword"],
            Channel::WeChat => &["wechatApiSecret"],
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Catalog entry for one resource kind.
#[derive(Clone, Debug)]
pub struct ResourceKind {
    /// URL segment, e.g. `dingtalkconfigs`. Unique within a registry.
    pub id: String,
    /// Object kind name written to `kind`, e.g. `DingTalkConfig`.
    pub kind: String,
    pub channel: Channel,
    pub shape: Shape,
    pub scope_class: ScopeClass,
    /// Empty for receivers.
    pub sensitive_fields: Vec<String>,
}

impl ResourceKind {
    pub fn new(channel: Channel, shape: Shape, scope_class: ScopeClass) -> Self {
        let (suffix, kind_suffix) = match shape {
            Shape::Config => ("configs", "Config"),
            Shape::Receiver => ("receivers", "Receiver"),
        };
        let sensitive_fields = match shape {
            Shape::Config => channel.sensitive_fields().iter().map(|f| f.to_string()).collect(),
            Shape::Receiver => Vec::new(),
        };
        ResourceKind {
            id: format!("{}{}", channel.prefix(), suffix),
            kind: format!("{}{}", channel.kind_prefix(), kind_suffix),
            channel,
            shape,
            scope_class,
            sensitive_fields,
        }
    }

    pub fn is_config(&self) -> bool {
        self.shape == Shape::Config
    }

    pub fn is_sensitive(&self, field: &str) -> bool {
        self.sensitive_fields.iter().any(|f| f == field)
    }
}

/// Immutable lookup table from identifier to kind. Built once at startup.
#[derive(Clone, Debug)]
pub struct Registry {
    kinds: Vec<Arc<ResourceKind>>,
    by_id: HashMap<String, Arc<ResourceKind>>,
}

impl Registry {
    /// Build a registry from an explicit catalog. Identifiers must be unique.
    pub fn new(kinds: Vec<ResourceKind>) -> Result<Self, ConfigError> {
        let mut by_id = HashMap::with_capacity(kinds.len());
        let mut ordered = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let kind = Arc::new(kind);
            if by_id.insert(kind.id.clone(), Arc::clone(&kind)).is_some() {
                return Err(ConfigError::DuplicateKind(kind.id.clone()));
            }
            ordered.push(kind);
        }
        Ok(Registry { kinds: ordered, by_id })
    }

    /// The ten built-in kinds: config and receiver for every channel, each servable at both scopes.
    pub fn builtin() -> Self {
        let kinds: Vec<Arc<ResourceKind>> = Channel::ALL
            .iter()
            .flat_map(|c| [Shape::Config, Shape::Receiver].map(|s| ResourceKind::new(*c, s, ScopeClass::Both)))
            .map(Arc::new)
            .collect();
        let by_id = kinds.iter().map(|k| (k.id.clone(), Arc::clone(k))).collect();
        Registry { kinds, by_id }
    }

    /// Look up a kind by identifier. Unknown identifiers fail before anything touches a store.
    pub fn resolve(&self, id: &str) -> Result<Arc<ResourceKind>, AppError> {
        self.by_id
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::KindNotFound { kind: id.to_string() })
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Arc<ResourceKind>> {
        self.kinds.iter()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
