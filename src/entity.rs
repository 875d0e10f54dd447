// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity identities for the broker hierarchy.
//!
//! These are plain value types: every registry in the crate keys on them,
//! so equality and hashing are by value, never by identity.
//!
//! ```text
//! TenantIdentity        "t1"
//! TenantNamespace       "t1/ns1"
//! TenantNamespaceTopic  "persistent://t1/ns1/topicA"
//! ```

use std::fmt;

/// Substring the broker appends to the shards of a partitioned topic
/// (`topicA-partition-0`, `topicA-partition-1`, ...).
pub const PARTITION_MARKER: &str = "-partition-";

/// Prefix reserved for broker-internal system topics (`__change_events`, ...).
pub const SYSTEM_TOPIC_PREFIX: &str = "__";

/// Returns `true` if `name` is an internal shard of a partitioned topic.
///
/// Shards are replicated through their logical topic and never get a
/// worker of their own.
pub fn is_partition_shard(name: &str) -> bool {
    name.contains(PARTITION_MARKER)
}

/// Returns `true` if the local part of a topic name marks a system topic.
pub fn is_system_topic(local_name: &str) -> bool {
    local_name.starts_with(SYSTEM_TOPIC_PREFIX)
}

/// A tenant name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantIdentity(String);

impl TenantIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `(tenant, namespace)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantNamespace {
    tenant: TenantIdentity,
    namespace: String,
}

impl TenantNamespace {
    pub fn new(tenant: TenantIdentity, namespace: impl Into<String>) -> Self {
        Self {
            tenant,
            namespace: namespace.into(),
        }
    }

    /// Build from a name returned by the admin listing.
    ///
    /// Admin APIs return namespaces either qualified (`t1/ns1`) or bare (`ns1`);
    /// both resolve to the same key. Returns `None` for an empty name or one
    /// qualified with a different tenant.
    pub fn from_listed(tenant: &TenantIdentity, listed: &str) -> Option<Self> {
        let local = match listed.split_once('/') {
            Some((owner, ns)) if owner == tenant.name() => ns,
            Some(_) => return None,
            None => listed,
        };
        if local.is_empty() || local.contains('/') {
            return None;
        }
        Some(Self::new(tenant.clone(), local))
    }

    pub fn tenant(&self) -> &TenantIdentity {
        &self.tenant
    }

    /// The local namespace name, without the tenant.
    pub fn local_name(&self) -> &str {
        &self.namespace
    }

    /// Canonical `tenant/namespace` path used by the admin API.
    pub fn namespace(&self) -> String {
        format!("{}/{}", self.tenant, self.namespace)
    }
}

impl fmt::Display for TenantNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.namespace)
    }
}

/// Topic storage domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum TopicDomain {
    #[default]
    Persistent,
    NonPersistent,
}

impl TopicDomain {
    pub fn scheme(&self) -> &'static str {
        match self {
            TopicDomain::Persistent => "persistent",
            TopicDomain::NonPersistent => "non-persistent",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "persistent" => Some(TopicDomain::Persistent),
            "non-persistent" => Some(TopicDomain::NonPersistent),
            _ => None,
        }
    }
}

/// A fully qualified logical topic: namespace, domain, and local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantNamespaceTopic {
    namespace: TenantNamespace,
    domain: TopicDomain,
    name: String,
}

impl TenantNamespaceTopic {
    pub fn new(namespace: TenantNamespace, domain: TopicDomain, name: impl Into<String>) -> Self {
        Self {
            namespace,
            domain,
            name: name.into(),
        }
    }

    /// Build from a name returned by `list_topics`.
    ///
    /// Accepts full names (`persistent://t1/ns1/topicA`) and bare local names
    /// (`topicA`, defaulting to the persistent domain). Returns `None` if a full
    /// name has an unknown scheme or points outside `namespace`.
    pub fn from_listed(namespace: &TenantNamespace, listed: &str) -> Option<Self> {
        let Some((scheme, rest)) = listed.split_once("://") else {
            if listed.is_empty() || listed.contains('/') {
                return None;
            }
            return Some(Self::new(namespace.clone(), TopicDomain::Persistent, listed));
        };

        let domain = TopicDomain::from_scheme(scheme)?;
        let prefix = namespace.namespace();
        let local = rest.strip_prefix(prefix.as_str())?.strip_prefix('/')?;
        if local.is_empty() || local.contains('/') {
            return None;
        }
        Some(Self::new(namespace.clone(), domain, local))
    }

    pub fn namespace(&self) -> &TenantNamespace {
        &self.namespace
    }

    pub fn domain(&self) -> TopicDomain {
        self.domain
    }

    /// The local topic name, without domain or namespace.
    pub fn local_name(&self) -> &str {
        &self.name
    }

    /// Full broker topic name, e.g. `persistent://t1/ns1/topicA`.
    pub fn topic(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TenantNamespaceTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.domain.scheme(), self.namespace, self.name)
    }
}
