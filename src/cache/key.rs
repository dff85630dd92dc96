//! Cache keys: `<namespace>:<entityType>:<entityId>`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScrapeError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub namespace: String,
    pub entity_type: String,
    /// May itself contain `:`
    pub entity_id: String,
}

impl CacheKey {
    pub fn new(
        namespace: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Key without the namespace, e.g. `video:v1`
    #[must_use]
    pub fn entity_ref(&self) -> String {
        format!("{}:{}", self.entity_type, self.entity_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.entity_type, self.entity_id)
    }
}

impl FromStr for CacheKey {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(ty), Some(id)) if !ns.is_empty() && !ty.is_empty() && !id.is_empty() => {
                Ok(Self::new(ns, ty, id))
            }
            _ => Err(ScrapeError::Config(format!(
                "cache key {s:?} is not <namespace>:<entityType>:<entityId>"
            ))),
        }
    }
}

/// Bulk-invalidation pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Every key in a namespace
    Namespace(String),
    /// Every key of one entity type in a namespace
    EntityType { namespace: String, entity_type: String },
}

impl KeyPattern {
    /// Key prefix matched by this pattern (always ends in `:`)
    #[must_use]
    pub fn prefix(&self) -> String {
        match self {
            Self::Namespace(ns) => format!("{ns}:"),
            Self::EntityType {
                namespace,
                entity_type,
            } => format!("{namespace}:{entity_type}:"),
        }
    }

    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses() {
        let key = CacheKey::new("scrape", "user", "abc123");
        assert_eq!(key.to_string(), "scrape:user:abc123");
        assert_eq!("scrape:user:abc123".parse::<CacheKey>().expect("valid"), key);
        assert_eq!(key.entity_ref(), "user:abc123");
    }

    #[test]
    fn entity_id_may_contain_separator() {
        let key: CacheKey = "scrape:video:v1:hd".parse().expect("valid");
        assert_eq!(key.entity_id, "v1:hd");
    }

    #[test]
    fn malformed_keys_rejected() {
        assert!("scrape:user".parse::<CacheKey>().is_err());
        assert!("scrape::x".parse::<CacheKey>().is_err());
    }

    #[test]
    fn patterns_do_not_overmatch() {
        let p = KeyPattern::EntityType {
            namespace: "scrape".into(),
            entity_type: "user".into(),
        };
        assert!(p.matches("scrape:user:1"));
        assert!(!p.matches("scrape:users:1"));
        assert!(KeyPattern::Namespace("scrape".into()).matches("scrape:video:v1"));
    }
}
