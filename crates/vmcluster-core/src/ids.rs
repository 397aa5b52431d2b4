//! Core identifier types for vmcluster.
//!
//! Resource identifiers are short prefixed strings (`cl-1a2b3c4d`,
//! `cln-5e6f7a8b`, `j-9c0d1e2f`). The prefix makes the resource kind visible
//! in logs and in change events, and the random suffix is derived with blake3.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IdError;

/// Number of hex characters in a generated identifier suffix.
pub const ID_SUFFIX_LEN: usize = 8;

fn random_suffix() -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let mut hasher = blake3::Hasher::new();
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hasher.update(&timestamp.to_le_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..ID_SUFFIX_LEN / 2])
}

fn deterministic_suffix(label: &str, seed: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(label.as_bytes());
    hasher.update(&seed.to_le_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..ID_SUFFIX_LEN / 2])
}

fn validate_prefixed(value: &str, prefix: &'static str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    let Some(suffix) = value.strip_prefix(prefix) else {
        return Err(IdError::InvalidPrefix {
            expected: prefix,
            got: value.to_string(),
        });
    };
    if suffix.is_empty()
        || !suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
    {
        return Err(IdError::InvalidCharacters(value.to_string()));
    }
    Ok(())
}

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// The prefix every identifier of this kind starts with.
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!("{}{}", Self::PREFIX, random_suffix()))
            }

            /// Generate a reproducible identifier for tests and fixtures.
            #[must_use]
            pub fn generate_deterministic(label: &str, seed: u64) -> Self {
                Self(format!("{}{}", Self::PREFIX, deterministic_suffix(label, seed)))
            }

            /// Parse an identifier, checking its prefix and suffix alphabet.
            ///
            /// # Errors
            ///
            /// Returns an error if the input is empty, carries the wrong
            /// prefix, or contains characters outside `[0-9a-z]`.
            pub fn parse(value: &str) -> Result<Self, IdError> {
                validate_prefixed(value, Self::PREFIX)?;
                Ok(Self(value.to_string()))
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate_prefixed(&value, Self::PREFIX)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

prefixed_id!(
    /// Identifier of a cluster (application or frontgate).
    ClusterId,
    "cl-"
);

prefixed_id!(
    /// Identifier of a single node within a cluster.
    NodeId,
    "cln-"
);

prefixed_id!(
    /// Identifier of a lifecycle job; tasks refer back to it.
    JobId,
    "j-"
);

/// Identifier of the user that owns a resource.
///
/// User ids come from the upstream identity provider and are opaque here;
/// the only requirement is that they are non-empty. An absent owner is
/// modelled as `Option<UserId>` rather than an empty string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a user id from any non-empty string.
    ///
    /// # Errors
    ///
    /// Returns `IdError::Empty` for an empty (or all-whitespace) input.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(value))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_id_generate_has_prefix() {
        let id = ClusterId::generate();
        assert!(id.as_str().starts_with("cl-"));
        assert_eq!(id.as_str().len(), "cl-".len() + ID_SUFFIX_LEN);
    }

    #[test]
    fn cluster_id_roundtrip() {
        let id = ClusterId::generate();
        let parsed = ClusterId::from_str(id.as_str()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn node_id_rejects_cluster_prefix() {
        let result = NodeId::parse("cl-abcdef01");
        assert!(matches!(result, Err(IdError::InvalidPrefix { .. })));
    }

    #[test]
    fn id_rejects_uppercase_suffix() {
        let result = JobId::parse("j-ABCDEF");
        assert!(matches!(result, Err(IdError::InvalidCharacters(_))));
    }

    #[test]
    fn id_rejects_bare_prefix() {
        assert!(matches!(
            ClusterId::parse("cl-"),
            Err(IdError::InvalidCharacters(_))
        ));
        assert!(matches!(ClusterId::parse(""), Err(IdError::Empty)));
    }

    #[test]
    fn deterministic_ids_are_stable() {
        let a = NodeId::generate_deterministic("node", 7);
        let b = NodeId::generate_deterministic("node", 7);
        let c = NodeId::generate_deterministic("node", 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn user_id_rejects_blank() {
        assert!(matches!(UserId::new("  "), Err(IdError::Empty)));
        assert_eq!(UserId::new("usr-alice").unwrap().as_str(), "usr-alice");
    }

    #[test]
    fn ids_serde_json() {
        let id = ClusterId::generate_deterministic("cluster", 1);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ClusterId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);

        let bad: Result<ClusterId, _> = serde_json::from_str("\"cln-1234abcd\"");
        assert!(bad.is_err());

        let user = UserId::new("usr-bob").unwrap();
        let parsed: UserId = serde_json::from_str(&serde_json::to_string(&user).unwrap()).unwrap();
        assert_eq!(user, parsed);
    }
}
