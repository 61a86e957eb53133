//! Actor identity
//!
//! TigerStyle: Explicit validation on construction, immutable afterwards.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an actor, used as the target of outbound calls
///
/// An actor ID is a namespace plus an id, written `namespace:id`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ActorId {
    namespace: String,
    id: String,
}

impl ActorId {
    /// Create a new ActorId with validation
    ///
    /// # Errors
    /// Returns `InvalidActorId` if either part is empty, too long, or contains
    /// characters other than alphanumerics, dash, underscore and dot.
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let id = id.into();
        let qualified = || format!("{}:{}", namespace, id);

        if namespace.is_empty() || id.is_empty() {
            return Err(Error::InvalidActorId {
                id: qualified(),
                reason: "namespace and id must be non-empty".into(),
            });
        }

        if namespace.len() > ACTOR_NAMESPACE_LENGTH_BYTES_MAX {
            return Err(Error::InvalidActorId {
                id: qualified(),
                reason: format!(
                    "namespace length {} exceeds limit {}",
                    namespace.len(),
                    ACTOR_NAMESPACE_LENGTH_BYTES_MAX
                ),
            });
        }

        if id.len() > ACTOR_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidActorId {
                id: qualified(),
                reason: format!(
                    "id length {} exceeds limit {}",
                    id.len(),
                    ACTOR_ID_LENGTH_BYTES_MAX
                ),
            });
        }

        let valid_chars = |s: &str| {
            s.chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        };

        if !valid_chars(&namespace) || !valid_chars(&id) {
            return Err(Error::InvalidActorId {
                id: qualified(),
                reason: "contains invalid characters".into(),
            });
        }

        Ok(Self { namespace, id })
    }

    /// Parse `namespace:id`
    pub fn parse(qualified: &str) -> Result<Self> {
        match qualified.split_once(':') {
            Some((namespace, id)) => Self::new(namespace, id),
            None => Err(Error::InvalidActorId {
                id: qualified.to_string(),
                reason: "expected namespace:id".into(),
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Full qualified name (namespace:id)
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace, self.id)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id_valid() {
        let id = ActorId::new("ledger", "bank-1").unwrap();
        assert_eq!(id.namespace(), "ledger");
        assert_eq!(id.id(), "bank-1");
        assert_eq!(id.qualified_name(), "ledger:bank-1");
    }

    #[test]
    fn test_actor_id_invalid_chars() {
        assert!(ActorId::new("ledger", "bank/1").is_err());
    }

    #[test]
    fn test_actor_id_too_long() {
        let long_id = "a".repeat(ACTOR_ID_LENGTH_BYTES_MAX + 1);
        let result = ActorId::new("ledger", long_id);
        assert!(matches!(result, Err(Error::InvalidActorId { .. })));
    }

    #[test]
    fn test_actor_id_parse() {
        let id = ActorId::parse("ledger:bank-2").unwrap();
        assert_eq!(format!("{}", id), "ledger:bank-2");
        assert!(ActorId::parse("no-separator").is_err());
        assert!(ActorId::parse(":empty").is_err());
    }
}
